//! Wallet spend scenarios: selection, change, sweep, signing.

use std::sync::Arc;

use ember_spv::clock::SystemClock;
use ember_spv::storage::{utxos_key, MemoryStorage, WalletStorage};
use ember_spv::wallet::builder::{estimate_fee, BuildOptions, DUST_THRESHOLD};
use ember_spv::wallet::utxo::{Utxo, UtxoSet};
use ember_spv::wallet::WalletManager;
use ember_spv::Network;

use embercore::address::{Address, AddressType};
use embercore::hashes::Txid;
use embercore::transaction::{SEQUENCE_FINAL, SEQUENCE_RBF};

const WALLET_ID: &str = "spend-test";

/// A wallet whose storage is pre-seeded with UTXOs paying its own
/// derived addresses, so signing works end to end.
async fn wallet_with_utxos(values: &[u64]) -> WalletManager {
    let params = Network::Regtest.params();

    let mut probe = WalletManager::new(
        params.clone(),
        WALLET_ID,
        Box::new(MemoryStorage::new()),
        Arc::new(SystemClock),
    );
    probe.load_seed(&[0x11; 32]).unwrap();
    let watched = probe.watched_scripts().unwrap();

    let mut set = UtxoSet::new();
    for (i, &value) in values.iter().enumerate() {
        set.add(Utxo {
            txid: Txid::from_byte_array([i as u8 + 1; 32]),
            vout: 0,
            value,
            script_pub_key: watched[i].script.clone(),
            address: watched[i].address.clone(),
            block_height: Some(100 + i as u32),
            confirmed: true,
            frozen: false,
        });
    }

    let mut storage = MemoryStorage::new();
    storage.set(&utxos_key(WALLET_ID), &set.to_json().unwrap()).await.unwrap();

    let mut wallet = WalletManager::new(
        params,
        WALLET_ID,
        Box::new(storage),
        Arc::new(SystemClock),
    );
    wallet.load_seed(&[0x11; 32]).unwrap();
    wallet.load_state().await.unwrap();
    wallet
}

fn external_address() -> String {
    let secp = secp256k1::Secp256k1::new();
    let sk = secp256k1::SecretKey::from_slice(&[0x77; 32]).unwrap();
    let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
    Address::from_pubkey(&pk, AddressType::Segwit, &Network::Regtest.params())
        .unwrap()
        .as_str()
        .to_string()
}

#[tokio::test]
async fn spend_with_change_selects_descending_and_conserves_value() {
    let wallet = wallet_with_utxos(&[100_000, 50_000]).await;
    let options = BuildOptions {
        fee_rate: 2,
        rbf: true,
        ..Default::default()
    };

    let built = wallet.create_transaction(&external_address(), 120_000, &options).unwrap();

    // Both inputs, largest first.
    assert_eq!(built.selected.len(), 2);
    assert_eq!(built.selected[0].value, 100_000);
    assert_eq!(built.selected[1].value, 50_000);

    // Recipient plus change.
    assert_eq!(built.tx.output.len(), 2);
    assert_eq!(built.tx.output[0].value, 120_000);
    let fee = estimate_fee(2, 2, 2);
    assert_eq!(built.fee, fee);
    assert_eq!(built.change_value, Some(30_000 - fee));

    // total_input - total_output = fee.
    let out_total: u64 = built.tx.output.iter().map(|o| o.value).sum();
    assert_eq!(150_000 - out_total, built.fee);

    // The change goes to the wallet's own change script.
    assert_eq!(built.tx.output[1].script_pubkey, wallet.change_script().unwrap());

    // RBF and signatures.
    for input in &built.tx.input {
        assert_eq!(input.sequence, SEQUENCE_RBF);
        assert_eq!(input.witness.len(), 2);
        assert_eq!(*input.witness[0].last().unwrap(), 0x01);
    }
}

#[tokio::test]
async fn sweep_produces_single_output_minus_fee() {
    let wallet = wallet_with_utxos(&[50_000, 50_000]).await;
    let options = BuildOptions {
        fee_rate: 1,
        subtract_fee_from_amount: true,
        ..Default::default()
    };

    let built = wallet.create_transaction(&external_address(), 0, &options).unwrap();

    let fee = estimate_fee(2, 1, 1);
    assert_eq!(built.tx.input.len(), 2);
    assert_eq!(built.tx.output.len(), 1);
    assert_eq!(built.tx.output[0].value, 100_000 - fee);
    assert_eq!(built.fee, fee);
    assert!(built.fee > 0);
    assert!(built.tx.output[0].value > DUST_THRESHOLD);
    assert_eq!(built.tx.input[0].sequence, SEQUENCE_FINAL);
}

#[tokio::test]
async fn insufficient_funds_surfaces_the_deficit() {
    let wallet = wallet_with_utxos(&[10_000]).await;
    let options = BuildOptions {
        fee_rate: 1,
        ..Default::default()
    };

    let err = wallet.create_transaction(&external_address(), 60_000, &options).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("insufficient funds"), "got: {}", message);
    assert!(message.contains("10000"), "got: {}", message);
}

#[tokio::test]
async fn signing_twice_is_bit_identical() {
    let wallet = wallet_with_utxos(&[80_000]).await;
    let options = BuildOptions {
        fee_rate: 1,
        ..Default::default()
    };

    let first = wallet.create_transaction(&external_address(), 30_000, &options).unwrap();
    let second = wallet.create_transaction(&external_address(), 30_000, &options).unwrap();
    assert_eq!(
        embercore::consensus::encode::serialize(&first.tx),
        embercore::consensus::encode::serialize(&second.tx)
    );
}
