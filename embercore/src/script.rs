// SPDX-License-Identifier: CC0-1.0

//! Script building and pattern probes.
//!
//! Only the handful of output script shapes the wallet produces and
//! recognizes are supported; this is not a script interpreter.

use std::fmt;
use std::io::{self, Read, Write};

use crate::consensus::encode::{Decodable, Encodable, Error};

/// `OP_0`.
pub const OP_0: u8 = 0x00;
/// `OP_1`; witness versions 1-16 map onto `OP_1..OP_16`.
pub const OP_1: u8 = 0x51;
/// `OP_DUP`.
pub const OP_DUP: u8 = 0x76;
/// `OP_HASH160`.
pub const OP_HASH160: u8 = 0xA9;
/// `OP_EQUAL`.
pub const OP_EQUAL: u8 = 0x87;
/// `OP_EQUALVERIFY`.
pub const OP_EQUALVERIFY: u8 = 0x88;
/// `OP_CHECKSIG`.
pub const OP_CHECKSIG: u8 = 0xAC;

/// An owned script.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ScriptBuf(Vec<u8>);

impl ScriptBuf {
    /// An empty script.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw script bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Script length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the script is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn new_p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
        script.extend_from_slice(pubkey_hash);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(script)
    }

    /// `OP_HASH160 <20 bytes> OP_EQUAL`.
    pub fn new_p2sh(script_hash: &[u8; 20]) -> Self {
        let mut script = Vec::with_capacity(23);
        script.extend_from_slice(&[OP_HASH160, 0x14]);
        script.extend_from_slice(script_hash);
        script.push(OP_EQUAL);
        Self(script)
    }

    /// `OP_0/OP_1..OP_16 <push program>`.
    ///
    /// `version` must be 0..=16 and `program` 2..=40 bytes per BIP141.
    pub fn new_witness_program(version: u8, program: &[u8]) -> Self {
        debug_assert!(version <= 16);
        debug_assert!((2..=40).contains(&program.len()));
        let mut script = Vec::with_capacity(2 + program.len());
        script.push(if version == 0 {
            OP_0
        } else {
            OP_1 + version - 1
        });
        script.push(program.len() as u8);
        script.extend_from_slice(program);
        Self(script)
    }

    /// Whether this is a canonical P2PKH output script.
    pub fn is_p2pkh(&self) -> bool {
        self.0.len() == 25
            && self.0[0] == OP_DUP
            && self.0[1] == OP_HASH160
            && self.0[2] == 0x14
            && self.0[23] == OP_EQUALVERIFY
            && self.0[24] == OP_CHECKSIG
    }

    /// Whether this is a canonical P2SH output script.
    pub fn is_p2sh(&self) -> bool {
        self.0.len() == 23 && self.0[0] == OP_HASH160 && self.0[1] == 0x14 && self.0[22] == OP_EQUAL
    }

    /// If this is a witness program, returns `(version, program)`.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        if self.0.len() < 4 || self.0.len() > 42 {
            return None;
        }
        let version = match self.0[0] {
            OP_0 => 0,
            op @ OP_1..=0x60 => op - OP_1 + 1,
            _ => return None,
        };
        let push_len = self.0[1] as usize;
        if push_len != self.0.len() - 2 || !(2..=40).contains(&push_len) {
            return None;
        }
        Some((version, &self.0[2..]))
    }

    /// Whether this is any witness program.
    pub fn is_witness_program(&self) -> bool {
        self.witness_program().is_some()
    }
}

impl fmt::Debug for ScriptBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ScriptBuf({})", hex::encode(&self.0))
    }
}

impl fmt::Display for ScriptBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl Encodable for ScriptBuf {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for ScriptBuf {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(Self(Vec::<u8>::consensus_decode(reader)?))
    }
}

impl serde::Serialize for ScriptBuf {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> serde::Deserialize<'de> for ScriptBuf {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        hex::decode(&s).map(ScriptBuf).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_shape() {
        let script = ScriptBuf::new_p2pkh(&[0x11; 20]);
        assert_eq!(script.len(), 25);
        assert!(script.is_p2pkh());
        assert!(!script.is_p2sh());
        assert!(!script.is_witness_program());
    }

    #[test]
    fn witness_program_probe() {
        let v0 = ScriptBuf::new_witness_program(0, &[0x22; 20]);
        assert_eq!(v0.witness_program(), Some((0, &[0x22u8; 20][..])));

        let v1 = ScriptBuf::new_witness_program(1, &[0x33; 32]);
        assert_eq!(v1.witness_program(), Some((1, &[0x33u8; 32][..])));

        // Truncated push is not a witness program.
        let bogus = ScriptBuf::from_bytes(vec![OP_0, 0x14, 0x01]);
        assert!(bogus.witness_program().is_none());
    }
}
