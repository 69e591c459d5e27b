//! UTXO and spent-outpoint extraction from blocks.
//!
//! Given a block and the wallet's script set, collect every output that
//! pays one of our scripts and every outpoint the block spends. Txids
//! come from the witness-stripped serialization, so segwit blocks
//! produce the same ids a non-witness peer would compute.

use std::collections::HashSet;

use embercore::block::Block;
use embercore::script::ScriptBuf;
use embercore::transaction::OutPoint;

use crate::wallet::utxo::Utxo;

/// One watched script and the address it belongs to.
#[derive(Debug, Clone)]
pub struct WatchedScript {
    /// The encoded address, stored on matched UTXOs.
    pub address: String,
    /// The script to match outputs against.
    pub script: ScriptBuf,
}

/// What a block scan produced.
#[derive(Debug, Default)]
pub struct BlockScanResult {
    /// New outputs paying watched scripts, confirmed at the scan height.
    pub utxos: Vec<Utxo>,
    /// Every outpoint any transaction in the block spent.
    pub spent_outpoints: HashSet<OutPoint>,
}

/// Scan a block against the wallet's watched scripts.
pub fn scan_block(block: &Block, watched: &[WatchedScript], height: u32) -> BlockScanResult {
    let mut result = BlockScanResult::default();

    for tx in &block.txdata {
        for input in &tx.input {
            result.spent_outpoints.insert(input.previous_output);
        }

        let mut txid = None;
        for (vout, output) in tx.output.iter().enumerate() {
            let Some(watch) = watched.iter().find(|w| w.script == output.script_pubkey) else {
                continue;
            };
            // Compute the (witness-stripped) txid once per transaction,
            // and only for transactions that actually pay us.
            let txid = *txid.get_or_insert_with(|| tx.txid());
            result.utxos.push(Utxo {
                txid,
                vout: vout as u32,
                value: output.value,
                script_pub_key: output.script_pubkey.clone(),
                address: watch.address.clone(),
                block_height: Some(height),
                confirmed: true,
                frozen: false,
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercore::block::BlockHeader;
    use embercore::hashes::{BlockHash, Txid};
    use embercore::params::Network;
    use embercore::transaction::{Transaction, TxIn, TxOut, SEQUENCE_FINAL};

    fn watched(salt: u8) -> WatchedScript {
        WatchedScript {
            address: format!("em1q-test-{}", salt),
            script: ScriptBuf::new_witness_program(0, &[salt; 20]),
        }
    }

    fn spend(prev: Txid, vout: u32, outputs: Vec<TxOut>, witness: Vec<Vec<u8>>) -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::new(prev, vout),
                script_sig: ScriptBuf::new(),
                sequence: SEQUENCE_FINAL,
                witness,
            }],
            output: outputs,
        }
    }

    fn block_with(txdata: Vec<Transaction>) -> Block {
        let params = Network::Regtest.params();
        Block {
            header: BlockHeader {
                version: 4,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: [0; 32],
                time: params.t2 + 1,
                bits: 0,
                nonce: 0,
                proof: vec![0; params.proof_length()],
            },
            txdata,
        }
    }

    #[test]
    fn matching_output_becomes_confirmed_utxo() {
        let watch = watched(7);
        let tx = spend(
            Txid::from_byte_array([1; 32]),
            0,
            vec![TxOut {
                value: 50_000,
                script_pubkey: watch.script.clone(),
            }],
            Vec::new(),
        );
        let expected_txid = tx.txid();
        let block = block_with(vec![tx]);

        let result = scan_block(&block, &[watch.clone()], 7);
        assert_eq!(result.utxos.len(), 1);
        let utxo = &result.utxos[0];
        assert_eq!(utxo.txid, expected_txid);
        assert_eq!(utxo.vout, 0);
        assert_eq!(utxo.value, 50_000);
        assert_eq!(utxo.address, watch.address);
        assert_eq!(utxo.block_height, Some(7));
        assert!(utxo.confirmed);
    }

    #[test]
    fn every_input_lands_in_spent_set() {
        let tx1 = spend(Txid::from_byte_array([1; 32]), 0, vec![], Vec::new());
        let tx2 = spend(Txid::from_byte_array([2; 32]), 3, vec![], Vec::new());
        let block = block_with(vec![tx1, tx2]);

        let result = scan_block(&block, &[watched(9)], 1);
        assert!(result.utxos.is_empty());
        assert_eq!(result.spent_outpoints.len(), 2);
        assert!(result
            .spent_outpoints
            .contains(&OutPoint::new(Txid::from_byte_array([2; 32]), 3)));
    }

    #[test]
    fn segwit_txid_is_witness_stripped() {
        let watch = watched(4);
        let outputs = vec![TxOut {
            value: 9_000,
            script_pubkey: watch.script.clone(),
        }];
        let with_witness = spend(
            Txid::from_byte_array([5; 32]),
            0,
            outputs.clone(),
            vec![vec![0x30, 0x45], vec![0x02; 33]],
        );
        let stripped = spend(Txid::from_byte_array([5; 32]), 0, outputs, Vec::new());

        let result = scan_block(&block_with(vec![with_witness]), &[watch], 2);
        assert_eq!(result.utxos[0].txid, stripped.txid());
    }

    #[test]
    fn multiple_outputs_yield_multiple_utxos() {
        let a = watched(1);
        let b = watched(2);
        let tx = spend(
            Txid::from_byte_array([6; 32]),
            0,
            vec![
                TxOut {
                    value: 100,
                    script_pubkey: a.script.clone(),
                },
                TxOut {
                    value: 200,
                    script_pubkey: ScriptBuf::new_witness_program(0, &[0xEE; 20]),
                },
                TxOut {
                    value: 300,
                    script_pubkey: b.script.clone(),
                },
            ],
            Vec::new(),
        );
        let block = block_with(vec![tx]);

        let result = scan_block(&block, &[a, b], 3);
        assert_eq!(result.utxos.len(), 2);
        assert_eq!(result.utxos[0].vout, 0);
        assert_eq!(result.utxos[1].vout, 2);
        assert_eq!(result.utxos[1].value, 300);
    }
}
