// SPDX-License-Identifier: CC0-1.0

//! Transactions.
//!
//! Serialization is segwit-aware: when any input carries witness data the
//! marker/flag bytes and per-input witness stacks are included, and the
//! txid is computed over the stripped (non-witness) serialization.

use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::consensus::encode::{
    decode_vec, encode_vec, serialize, Decodable, Encodable, Error, VarInt,
};
use crate::hashes::{sha256d, Txid};
use crate::script::ScriptBuf;

/// Sequence value that opts an input into BIP125 replace-by-fee.
pub const SEQUENCE_RBF: u32 = 0xFFFF_FFFD;

/// Final sequence value; disables RBF and locktime for the input.
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// A reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// The referenced transaction's id.
    pub txid: Txid,
    /// The index of the referenced output.
    pub vout: u32,
}

impl OutPoint {
    /// Create a new outpoint.
    pub fn new(txid: Txid, vout: u32) -> Self {
        OutPoint { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.txid.consensus_encode(writer)?;
        len += self.vout.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for OutPoint {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(OutPoint {
            txid: Txid::consensus_decode(reader)?,
            vout: u32::consensus_decode(reader)?,
        })
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// The output being spent.
    pub previous_output: OutPoint,
    /// The unlocking script; empty for segwit spends.
    pub script_sig: ScriptBuf,
    /// The sequence number.
    pub sequence: u32,
    /// The witness stack; empty when the input has no witness.
    pub witness: Vec<Vec<u8>>,
}

impl Encodable for TxIn {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.previous_output.consensus_encode(writer)?;
        len += self.script_sig.consensus_encode(writer)?;
        len += self.sequence.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for TxIn {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(TxIn {
            previous_output: OutPoint::consensus_decode(reader)?,
            script_sig: ScriptBuf::consensus_decode(reader)?,
            sequence: u32::consensus_decode(reader)?,
            witness: Vec::new(),
        })
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Value in satoshis.
    pub value: u64,
    /// The locking script.
    pub script_pubkey: ScriptBuf,
}

impl Encodable for TxOut {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.value.consensus_encode(writer)?;
        len += self.script_pubkey.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for TxOut {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(TxOut {
            value: u64::consensus_decode(reader)?,
            script_pubkey: ScriptBuf::consensus_decode(reader)?,
        })
    }
}

/// An Ember transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version.
    pub version: u32,
    /// Block height or timestamp before which the transaction is invalid.
    pub lock_time: u32,
    /// The inputs.
    pub input: Vec<TxIn>,
    /// The outputs.
    pub output: Vec<TxOut>,
}

impl Transaction {
    /// Whether any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.input.iter().any(|input| !input.witness.is_empty())
    }

    /// The transaction id: dSHA-256 over the non-witness serialization.
    pub fn txid(&self) -> Txid {
        let mut enc = Vec::new();
        self.encode_without_witness(&mut enc).expect("in-memory writers don't error");
        Txid::from_byte_array(sha256d(&enc))
    }

    /// The witness transaction id: dSHA-256 over the full serialization.
    pub fn wtxid(&self) -> Txid {
        Txid::from_byte_array(sha256d(&serialize(self)))
    }

    /// Serialized size without witness data.
    pub fn base_size(&self) -> usize {
        let mut enc = Vec::new();
        self.encode_without_witness(&mut enc).expect("in-memory writers don't error");
        enc.len()
    }

    /// Total serialized size including witness data.
    pub fn total_size(&self) -> usize {
        serialize(self).len()
    }

    /// BIP141 virtual size, rounded up.
    pub fn vsize(&self) -> usize {
        let weight = self.base_size() * 3 + self.total_size();
        (weight + 3) / 4
    }

    fn encode_without_witness<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.version.consensus_encode(writer)?;
        len += encode_vec(&self.input, writer)?;
        len += encode_vec(&self.output, writer)?;
        len += self.lock_time.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Encodable for Transaction {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        if !self.has_witness() {
            return self.encode_without_witness(writer);
        }
        let mut len = self.version.consensus_encode(writer)?;
        // Segwit marker and flag.
        writer.write_all(&[0x00, 0x01])?;
        len += 2;
        len += encode_vec(&self.input, writer)?;
        len += encode_vec(&self.output, writer)?;
        for input in &self.input {
            len += VarInt(input.witness.len() as u64).consensus_encode(writer)?;
            for item in &input.witness {
                len += item.consensus_encode(writer)?;
            }
        }
        len += self.lock_time.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for Transaction {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let version = u32::consensus_decode(reader)?;
        let first = VarInt::consensus_decode(reader)?;

        let (mut input, has_witness): (Vec<TxIn>, bool) = if first.0 == 0 {
            // A zero here is the segwit marker; the flag byte must follow.
            let flag = u8::consensus_decode(reader)?;
            if flag != 0x01 {
                return Err(Error::ParseFailed("unsupported segwit flag"));
            }
            (decode_vec(reader, 41)?, true)
        } else {
            let count = first.0 as usize;
            let mut inputs = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                inputs.push(TxIn::consensus_decode(reader)?);
            }
            (inputs, false)
        };

        let output = decode_vec(reader, 9)?;

        if has_witness {
            for input in input.iter_mut() {
                let items = VarInt::consensus_decode(reader)?.0 as usize;
                let mut witness = Vec::with_capacity(items.min(32));
                for _ in 0..items {
                    witness.push(Vec::<u8>::consensus_decode(reader)?);
                }
                input.witness = witness;
            }
        }

        let lock_time = u32::consensus_decode(reader)?;

        Ok(Transaction {
            version,
            lock_time,
            input,
            output,
        })
    }
}
