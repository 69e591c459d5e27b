// SPDX-License-Identifier: CC0-1.0

//! Block-data messages: inventories and `getheaders`.

use std::io::{self, Read, Write};

use crate::consensus::encode::{decode_vec, encode_vec, Decodable, Encodable, Error};
use crate::hashes::{BlockHash, Txid};
use crate::network::constants::PROTOCOL_VERSION;

/// Witness flag ORed into inventory types per BIP144.
pub const INV_WITNESS_FLAG: u32 = 0x4000_0000;

/// An inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inventory {
    /// Error (type 0).
    Error,
    /// `MSG_TX` (type 1).
    Transaction(Txid),
    /// `MSG_BLOCK` (type 2).
    Block(BlockHash),
    /// `MSG_WITNESS_TX` (type 0x40000001).
    WitnessTransaction(Txid),
    /// Any other inventory type.
    Unknown {
        /// The raw inventory type.
        inv_type: u32,
        /// The raw hash.
        hash: [u8; 32],
    },
}

impl Inventory {
    /// The raw inventory type code.
    pub fn inv_type(&self) -> u32 {
        match self {
            Inventory::Error => 0,
            Inventory::Transaction(_) => 1,
            Inventory::Block(_) => 2,
            Inventory::WitnessTransaction(_) => 1 | INV_WITNESS_FLAG,
            Inventory::Unknown { inv_type, .. } => *inv_type,
        }
    }

    /// The referenced transaction id, if this inventory names one
    /// (witness or not).
    pub fn txid(&self) -> Option<Txid> {
        match self {
            Inventory::Transaction(txid) | Inventory::WitnessTransaction(txid) => Some(*txid),
            _ => None,
        }
    }

    fn raw_hash(&self) -> [u8; 32] {
        match self {
            Inventory::Error => [0u8; 32],
            Inventory::Transaction(txid) | Inventory::WitnessTransaction(txid) => {
                txid.to_byte_array()
            }
            Inventory::Block(hash) => hash.to_byte_array(),
            Inventory::Unknown { hash, .. } => *hash,
        }
    }
}

impl Encodable for Inventory {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.inv_type().consensus_encode(writer)?;
        len += self.raw_hash().consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for Inventory {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let inv_type = u32::consensus_decode(reader)?;
        let hash = <[u8; 32]>::consensus_decode(reader)?;
        Ok(match inv_type {
            0 => Inventory::Error,
            1 => Inventory::Transaction(Txid::from_byte_array(hash)),
            2 => Inventory::Block(BlockHash::from_byte_array(hash)),
            t if t == 1 | INV_WITNESS_FLAG => {
                Inventory::WitnessTransaction(Txid::from_byte_array(hash))
            }
            other => Inventory::Unknown {
                inv_type: other,
                hash,
            },
        })
    }
}

/// The `getheaders` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    /// Protocol version.
    pub version: u32,
    /// Block locator hashes, newest first.
    pub locator_hashes: Vec<BlockHash>,
    /// Hash to stop at; all zeros means "to tip".
    pub stop_hash: BlockHash,
}

impl GetHeadersMessage {
    /// Build a request from a locator, stopping at the tip.
    pub fn new(locator_hashes: Vec<BlockHash>, stop_hash: BlockHash) -> Self {
        GetHeadersMessage {
            version: PROTOCOL_VERSION,
            locator_hashes,
            stop_hash,
        }
    }
}

impl Encodable for GetHeadersMessage {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.version.consensus_encode(writer)?;
        len += encode_vec(&self.locator_hashes, writer)?;
        len += self.stop_hash.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for GetHeadersMessage {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(GetHeadersMessage {
            version: u32::consensus_decode(reader)?,
            locator_hashes: decode_vec(reader, 32)?,
            stop_hash: BlockHash::consensus_decode(reader)?,
        })
    }
}

/// The `sendcmpct` message (BIP152). The client only ever announces
/// `announce = false`, i.e. low-bandwidth mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCmpct {
    /// Whether blocks should be announced via `cmpctblock`.
    pub announce: bool,
    /// Compact block protocol version.
    pub version: u64,
}

impl Encodable for SendCmpct {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.announce.consensus_encode(writer)?;
        len += self.version.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for SendCmpct {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(SendCmpct {
            announce: bool::consensus_decode(reader)?,
            version: u64::consensus_decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::encode::{deserialize, serialize};

    #[test]
    fn inventory_type_codes() {
        let txid = Txid::from_byte_array([1u8; 32]);
        assert_eq!(Inventory::Transaction(txid).inv_type(), 1);
        assert_eq!(Inventory::WitnessTransaction(txid).inv_type(), 0x4000_0001);
        assert_eq!(Inventory::Block(BlockHash::from_byte_array([2u8; 32])).inv_type(), 2);
    }

    #[test]
    fn inventory_roundtrip() {
        let items = vec![
            Inventory::Transaction(Txid::from_byte_array([1u8; 32])),
            Inventory::Block(BlockHash::from_byte_array([2u8; 32])),
            Inventory::WitnessTransaction(Txid::from_byte_array([3u8; 32])),
            Inventory::Unknown {
                inv_type: 5,
                hash: [4u8; 32],
            },
        ];
        for item in items {
            let decoded: Inventory = deserialize(&serialize(&item)).unwrap();
            assert_eq!(decoded, item);
        }
    }

    #[test]
    fn getheaders_roundtrip() {
        let msg = GetHeadersMessage::new(
            vec![
                BlockHash::from_byte_array([9u8; 32]),
                BlockHash::from_byte_array([8u8; 32]),
            ],
            BlockHash::all_zeros(),
        );
        let decoded: GetHeadersMessage = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.version, PROTOCOL_VERSION);
    }
}
