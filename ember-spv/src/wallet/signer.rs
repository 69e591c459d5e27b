//! BIP143 signing for P2WPKH inputs.
//!
//! Signatures are RFC6979 deterministic and low-S via secp256k1. As a
//! final gate, every signature is verified against its own sighash
//! before the transaction is considered broadcastable.

use std::collections::HashMap;

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use embercore::hashes::hash160;
use embercore::sighash::{p2wpkh_script_code, EcdsaSighashType, SighashCache};
use embercore::transaction::{OutPoint, Transaction};

use crate::error::{WalletError, WalletResult};
use crate::wallet::utxo::Utxo;

/// Key material for the inputs being signed, looked up by the 20-byte
/// pubkey hash inside each spent output's witness program.
pub type SigningKeys = HashMap<[u8; 20], (SecretKey, PublicKey)>;

/// Sign every input of `tx` as P2WPKH. `spent` must contain the UTXO for
/// each input's outpoint (it supplies the committed value and script).
pub fn sign_transaction(
    tx: &mut Transaction,
    spent: &[Utxo],
    keys: &SigningKeys,
) -> WalletResult<()> {
    let secp = Secp256k1::new();
    let by_outpoint: HashMap<OutPoint, &Utxo> =
        spent.iter().map(|u| (u.outpoint(), u)).collect();

    let mut witnesses = Vec::with_capacity(tx.input.len());
    {
        let mut cache = SighashCache::new(tx);
        for index in 0..cache_input_count(&by_outpoint, tx)? {
            let utxo = by_outpoint
                .get(&tx.input[index].previous_output)
                .ok_or(WalletError::UnknownKey(index))?;

            let pubkey_hash = witness_pubkey_hash(utxo, index)?;
            let (secret_key, public_key) =
                keys.get(&pubkey_hash).ok_or(WalletError::UnknownKey(index))?;
            debug_assert_eq!(hash160(&public_key.serialize()), pubkey_hash);

            let script_code = p2wpkh_script_code(&pubkey_hash);
            let sighash = cache
                .segwit_v0_signature_hash(index, &script_code, utxo.value, EcdsaSighashType::All)
                .map_err(|_| WalletError::UnknownKey(index))?;

            let message = Message::from_digest(sighash);
            let signature = secp.sign_ecdsa(&message, secret_key);
            verify_signature(&secp, &message, &signature, public_key, index)?;

            let mut sig_bytes = signature.serialize_der().to_vec();
            sig_bytes.push(EcdsaSighashType::All.to_u32() as u8);
            witnesses.push(vec![sig_bytes, public_key.serialize().to_vec()]);
        }
    }

    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }
    Ok(())
}

fn cache_input_count(
    by_outpoint: &HashMap<OutPoint, &Utxo>,
    tx: &Transaction,
) -> WalletResult<usize> {
    for (index, input) in tx.input.iter().enumerate() {
        if !by_outpoint.contains_key(&input.previous_output) {
            return Err(WalletError::UnknownKey(index));
        }
    }
    Ok(tx.input.len())
}

fn witness_pubkey_hash(utxo: &Utxo, index: usize) -> WalletResult<[u8; 20]> {
    match utxo.script_pub_key.witness_program() {
        Some((0, program)) if program.len() == 20 => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(program);
            Ok(hash)
        }
        _ => Err(WalletError::UnknownKey(index)),
    }
}

fn verify_signature(
    secp: &Secp256k1<secp256k1::All>,
    message: &Message,
    signature: &Signature,
    public_key: &PublicKey,
    index: usize,
) -> WalletResult<()> {
    secp.verify_ecdsa(message, signature, public_key)
        .map_err(|_| WalletError::SignatureInvalid(index))
}
