// SPDX-License-Identifier: CC0-1.0

//! Signature hash implementation (used in transaction signing).
//!
//! Only the BIP143 segwit-v0 algorithm is implemented; the wallet spends
//! P2WPKH outputs exclusively. The three midstate hashes (prevouts,
//! sequences, outputs) are computed once per transaction and reused
//! across inputs.

use thiserror::Error;

use crate::consensus::encode::{serialize, Encodable, VarInt};
use crate::hashes::sha256d;
use crate::script::ScriptBuf;
use crate::transaction::Transaction;

/// Hashtype of an input's signature, encoded in the last byte of the
/// signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcdsaSighashType {
    /// 0x1: Sign all outputs.
    All = 0x01,
}

impl EcdsaSighashType {
    /// The `u32` flag hashed into the preimage.
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// Possible errors in computing the signature message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("input index {index} out of bounds ({inputs_size} inputs)")]
    IndexOutOfInputsBounds {
        /// Requested index.
        index: usize,
        /// Number of transaction inputs.
        inputs_size: usize,
    },
}

/// Efficiently calculates BIP143 signature hash messages.
pub struct SighashCache<'a> {
    tx: &'a Transaction,
    hash_prevouts: Option<[u8; 32]>,
    hash_sequence: Option<[u8; 32]>,
    hash_outputs: Option<[u8; 32]>,
}

impl<'a> SighashCache<'a> {
    /// Constructs a new cache for an unsigned transaction. For the
    /// generated sighashes to be valid, no fields other than witnesses
    /// may change afterwards.
    pub fn new(tx: &'a Transaction) -> Self {
        SighashCache {
            tx,
            hash_prevouts: None,
            hash_sequence: None,
            hash_outputs: None,
        }
    }

    /// The BIP143 sighash for `input_index` spending `value` under
    /// `script_code`.
    pub fn segwit_v0_signature_hash(
        &mut self,
        input_index: usize,
        script_code: &ScriptBuf,
        value: u64,
        sighash_type: EcdsaSighashType,
    ) -> Result<[u8; 32], Error> {
        let input = self.tx.input.get(input_index).ok_or(Error::IndexOutOfInputsBounds {
            index: input_index,
            inputs_size: self.tx.input.len(),
        })?;

        let mut preimage = Vec::with_capacity(156 + script_code.len());
        preimage.extend_from_slice(&self.tx.version.to_le_bytes());
        preimage.extend_from_slice(&self.hash_prevouts());
        preimage.extend_from_slice(&self.hash_sequence());
        preimage.extend_from_slice(&serialize(&input.previous_output));
        VarInt(script_code.len() as u64)
            .consensus_encode(&mut preimage)
            .expect("in-memory writers don't error");
        preimage.extend_from_slice(script_code.as_bytes());
        preimage.extend_from_slice(&value.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(&self.hash_outputs());
        preimage.extend_from_slice(&self.tx.lock_time.to_le_bytes());
        preimage.extend_from_slice(&sighash_type.to_u32().to_le_bytes());

        Ok(sha256d(&preimage))
    }

    fn hash_prevouts(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_prevouts.get_or_insert_with(|| {
            let mut enc = Vec::with_capacity(36 * tx.input.len());
            for input in &tx.input {
                input
                    .previous_output
                    .consensus_encode(&mut enc)
                    .expect("in-memory writers don't error");
            }
            sha256d(&enc)
        })
    }

    fn hash_sequence(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_sequence.get_or_insert_with(|| {
            let mut enc = Vec::with_capacity(4 * tx.input.len());
            for input in &tx.input {
                enc.extend_from_slice(&input.sequence.to_le_bytes());
            }
            sha256d(&enc)
        })
    }

    fn hash_outputs(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_outputs.get_or_insert_with(|| {
            let mut enc = Vec::new();
            for output in &tx.output {
                output.consensus_encode(&mut enc).expect("in-memory writers don't error");
            }
            sha256d(&enc)
        })
    }
}

/// The script code for a P2WPKH spend: the canonical P2PKH script over
/// the same pubkey hash.
pub fn p2wpkh_script_code(pubkey_hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2pkh(pubkey_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashes::Txid;
    use crate::transaction::{OutPoint, TxIn, TxOut, SEQUENCE_RBF};

    fn single_input_tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([0xAB; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: SEQUENCE_RBF,
                witness: Vec::new(),
            }],
            output: vec![TxOut {
                value: 90_000,
                script_pubkey: ScriptBuf::new_witness_program(0, &[0x42; 20]),
            }],
        }
    }

    #[test]
    fn sighash_is_deterministic() {
        let tx = single_input_tx();
        let script_code = p2wpkh_script_code(&[0x42; 20]);

        let mut cache1 = SighashCache::new(&tx);
        let mut cache2 = SighashCache::new(&tx);
        let a = cache1
            .segwit_v0_signature_hash(0, &script_code, 100_000, EcdsaSighashType::All)
            .unwrap();
        let b = cache2
            .segwit_v0_signature_hash(0, &script_code, 100_000, EcdsaSighashType::All)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sighash_commits_to_value() {
        let tx = single_input_tx();
        let script_code = p2wpkh_script_code(&[0x42; 20]);
        let mut cache = SighashCache::new(&tx);

        let a = cache
            .segwit_v0_signature_hash(0, &script_code, 100_000, EcdsaSighashType::All)
            .unwrap();
        let b = cache
            .segwit_v0_signature_hash(0, &script_code, 100_001, EcdsaSighashType::All)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn out_of_bounds_index_errors() {
        let tx = single_input_tx();
        let script_code = p2wpkh_script_code(&[0x42; 20]);
        let mut cache = SighashCache::new(&tx);
        assert_eq!(
            cache.segwit_v0_signature_hash(5, &script_code, 1, EcdsaSighashType::All),
            Err(Error::IndexOutOfInputsBounds {
                index: 5,
                inputs_size: 1
            })
        );
    }

    #[test]
    fn preimage_structure_matches_bip143() {
        // Manually assemble the preimage for the single-input case and
        // compare against the cache.
        let tx = single_input_tx();
        let script_code = p2wpkh_script_code(&[0x42; 20]);
        let value = 100_000u64;

        let hash_prevouts = sha256d(&serialize(&tx.input[0].previous_output));
        let hash_sequence = sha256d(&tx.input[0].sequence.to_le_bytes());
        let hash_outputs = sha256d(&serialize(&tx.output[0]));

        let mut preimage = Vec::new();
        preimage.extend_from_slice(&tx.version.to_le_bytes());
        preimage.extend_from_slice(&hash_prevouts);
        preimage.extend_from_slice(&hash_sequence);
        preimage.extend_from_slice(&serialize(&tx.input[0].previous_output));
        preimage.push(script_code.len() as u8);
        preimage.extend_from_slice(script_code.as_bytes());
        preimage.extend_from_slice(&value.to_le_bytes());
        preimage.extend_from_slice(&tx.input[0].sequence.to_le_bytes());
        preimage.extend_from_slice(&hash_outputs);
        preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
        preimage.extend_from_slice(&1u32.to_le_bytes());

        let mut cache = SighashCache::new(&tx);
        let sighash = cache
            .segwit_v0_signature_hash(0, &script_code, value, EcdsaSighashType::All)
            .unwrap();
        assert_eq!(sighash, sha256d(&preimage));
    }
}
