// SPDX-License-Identifier: CC0-1.0

//! Block headers and blocks.
//!
//! An Ember header is the 80 canonical Bitcoin fields followed by an
//! opaque proof blob whose length comes from [`ChainParams`]. Header
//! identity depends on the block timestamp: the chain changed its header
//! hash function twice, and both legacy rules must be reproduced to
//! recognize historical blocks.

use std::io::{self, Read, Write};

use crate::consensus::encode::{
    decode_vec, encode_vec, serialize, Decodable, DecodableWithParams, Encodable, Error, VarInt,
};
use crate::hashes::{sha256, sha256d, BlockHash};
use crate::params::ChainParams;
use crate::transaction::Transaction;

/// An Ember block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version.
    pub version: u32,
    /// Hash of the previous block.
    pub prev_blockhash: BlockHash,
    /// Merkle root of the block's transactions.
    pub merkle_root: [u8; 32],
    /// Block timestamp.
    pub time: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Nonce.
    pub nonce: u32,
    /// Opaque trailing proof blob; its length is fixed by chain params.
    pub proof: Vec<u8>,
}

impl BlockHeader {
    /// Compute the block hash under the chain's timestamp cutover rules.
    ///
    /// Blocks up to `t1` are identified by a single SHA-256 of the proof
    /// blob alone; blocks up to `t2` by dSHA-256 of the full serialized
    /// header; everything later by a single SHA-256 of the full header.
    pub fn block_hash(&self, params: &ChainParams) -> BlockHash {
        if self.time <= params.t1 {
            BlockHash::from_byte_array(sha256(&self.proof))
        } else if self.time <= params.t2 {
            BlockHash::from_byte_array(sha256d(&serialize(self)))
        } else {
            BlockHash::from_byte_array(sha256(&serialize(self)))
        }
    }

    /// Decode a header from a raw fixed-width record.
    pub fn from_raw(record: &[u8], params: &ChainParams) -> Result<Self, Error> {
        if record.len() != params.header_length {
            return Err(Error::ParseFailed("header record has wrong length"));
        }
        let mut cursor = io::Cursor::new(record);
        Self::consensus_decode_with_params(&mut cursor, params)
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += self.version.consensus_encode(writer)?;
        len += self.prev_blockhash.consensus_encode(writer)?;
        len += self.merkle_root.consensus_encode(writer)?;
        len += self.time.consensus_encode(writer)?;
        len += self.bits.consensus_encode(writer)?;
        len += self.nonce.consensus_encode(writer)?;
        writer.write_all(&self.proof)?;
        len += self.proof.len();
        Ok(len)
    }
}

impl DecodableWithParams for BlockHeader {
    fn consensus_decode_with_params<R: Read + ?Sized>(
        reader: &mut R,
        params: &ChainParams,
    ) -> Result<Self, Error> {
        let version = u32::consensus_decode(reader)?;
        let prev_blockhash = BlockHash::consensus_decode(reader)?;
        let merkle_root = <[u8; 32]>::consensus_decode(reader)?;
        let time = u32::consensus_decode(reader)?;
        let bits = u32::consensus_decode(reader)?;
        let nonce = u32::consensus_decode(reader)?;
        let mut proof = vec![0u8; params.proof_length()];
        reader.read_exact(&mut proof)?;
        Ok(BlockHeader {
            version,
            prev_blockhash,
            merkle_root,
            time,
            bits,
            nonce,
            proof,
        })
    }
}

/// A full block: a header plus its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// The block's transactions.
    pub txdata: Vec<Transaction>,
}

impl Block {
    /// The block hash, i.e. the hash of the header.
    pub fn block_hash(&self, params: &ChainParams) -> BlockHash {
        self.header.block_hash(params)
    }
}

impl Encodable for Block {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.header.consensus_encode(writer)?;
        len += encode_vec(&self.txdata, writer)?;
        Ok(len)
    }
}

impl DecodableWithParams for Block {
    fn consensus_decode_with_params<R: Read + ?Sized>(
        reader: &mut R,
        params: &ChainParams,
    ) -> Result<Self, Error> {
        let header = BlockHeader::consensus_decode_with_params(reader, params)?;
        let txdata = decode_vec(reader, 60)?;
        Ok(Block { header, txdata })
    }
}

/// The `headers` message frames each header with a trailing varint
/// transaction count, which is always zero. This wrapper applies that
/// framing on encode and strips it on decode.
pub(crate) struct WireHeaders(pub Vec<BlockHeader>);

impl Encodable for WireHeaders {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = VarInt(self.0.len() as u64).consensus_encode(writer)?;
        for header in &self.0 {
            len += header.consensus_encode(writer)?;
            len += 0u8.consensus_encode(writer)?;
        }
        Ok(len)
    }
}

impl DecodableWithParams for WireHeaders {
    fn consensus_decode_with_params<R: Read + ?Sized>(
        reader: &mut R,
        params: &ChainParams,
    ) -> Result<Self, Error> {
        let count = VarInt::consensus_decode(reader)?.0 as usize;
        if count.saturating_mul(params.header_length) > crate::consensus::encode::MAX_VEC_SIZE {
            return Err(Error::ParseFailed("headers message too large"));
        }
        let mut headers = Vec::with_capacity(count);
        for _ in 0..count {
            headers.push(BlockHeader::consensus_decode_with_params(reader, params)?);
            // Trailing tx_count, zero by construction in `headers` framing.
            let _ = VarInt::consensus_decode(reader)?;
        }
        Ok(WireHeaders(headers))
    }
}
