// SPDX-License-Identifier: CC0-1.0

//! BIP158 compact block filters.
//!
//! The basic filter is a Golomb-coded set with parameter P=19 and
//! false-positive modulus M=784931. Set elements are SipHash-2-4 digests
//! of output scripts, keyed by the first 16 bytes of the block hash and
//! mapped into `[0, N*M)` with the 128-bit multiply-shift reduction.
//!
//! The chain's filter header rule differs from upstream BIP157 in using a
//! single SHA-256: `filter_hash = SHA256(filter_bytes)` and
//! `header = SHA256(filter_hash || prev_header)`.

use std::hash::Hasher;
use std::io;

use siphasher::sip::SipHasher24;
use thiserror::Error;

use crate::consensus::encode::{deserialize_partial, serialize, VarInt};
use crate::hashes::{sha256, BlockHash, FilterHash, FilterHeader};

/// Golomb-Rice coding parameter.
pub const GCS_P: u8 = 19;

/// False-positive modulus.
pub const GCS_M: u64 = 784_931;

/// Errors produced while reading a filter.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed filter: {0}")]
    Malformed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A raw compact filter for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFilter {
    /// The raw filter bytes: a varint element count followed by the
    /// Golomb-coded set.
    pub content: Vec<u8>,
}

impl BlockFilter {
    /// Wrap raw filter bytes as received off the wire.
    pub fn new(content: Vec<u8>) -> Self {
        BlockFilter { content }
    }

    /// SHA-256 of the raw filter bytes.
    pub fn filter_hash(&self) -> FilterHash {
        FilterHash::from_byte_array(sha256(&self.content))
    }

    /// Extend the filter header chain with this filter.
    pub fn filter_header(&self, prev_header: &FilterHeader) -> FilterHeader {
        filter_header(&self.filter_hash(), prev_header)
    }

    /// The declared element count.
    pub fn element_count(&self) -> Result<u64, Error> {
        let (n, _) = deserialize_partial::<VarInt>(&self.content)
            .map_err(|_| Error::Malformed("missing element count"))?;
        Ok(n.0)
    }

    /// Decode the full sorted value set.
    pub fn decode_values(&self) -> Result<Vec<u64>, Error> {
        let (n, consumed) = deserialize_partial::<VarInt>(&self.content)
            .map_err(|_| Error::Malformed("missing element count"))?;
        let mut reader = BitReader::new(&self.content[consumed..]);
        let mut values = Vec::with_capacity((n.0 as usize).min(100_000));
        let mut last = 0u64;
        for _ in 0..n.0 {
            // The stream may legitimately end early; decoding halts there.
            let Some(delta) = read_golomb(&mut reader) else {
                break;
            };
            last += delta;
            values.push(last);
        }
        Ok(values)
    }

    /// Whether any of the given scripts is (probabilistically) contained
    /// in this filter. `block_hash` keys the SipHash.
    pub fn match_any<'a, I>(&self, block_hash: &BlockHash, scripts: I) -> Result<bool, Error>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let n = self.element_count()?;
        if n == 0 {
            return Ok(false);
        }
        let values = self.decode_values()?;
        let key = siphash_key(block_hash);
        let nm = n * GCS_M;
        for script in scripts {
            let target = map_to_range(siphash(key, script), nm);
            if values.binary_search(&target).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// `SHA256(filter_hash || prev_header)`.
pub fn filter_header(filter_hash: &FilterHash, prev_header: &FilterHeader) -> FilterHeader {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(filter_hash.as_bytes());
    preimage[32..].copy_from_slice(prev_header.as_bytes());
    FilterHeader::from_byte_array(sha256(&preimage))
}

/// Builds a filter from a set of scripts. Used by regtest tooling and
/// tests; the client itself only reads filters.
pub struct BlockFilterWriter<'a> {
    block_hash: &'a BlockHash,
    elements: Vec<Vec<u8>>,
}

impl<'a> BlockFilterWriter<'a> {
    /// Start a filter for the given block.
    pub fn new(block_hash: &'a BlockHash) -> Self {
        BlockFilterWriter {
            block_hash,
            elements: Vec::new(),
        }
    }

    /// Add an element (an output script) to the set.
    pub fn add_element(&mut self, element: &[u8]) {
        self.elements.push(element.to_vec());
    }

    /// Encode the accumulated set.
    pub fn finish(self) -> BlockFilter {
        let n = self.elements.len() as u64;
        let mut content = serialize(&VarInt(n));
        if n == 0 {
            return BlockFilter::new(content);
        }

        let key = siphash_key(self.block_hash);
        let nm = n * GCS_M;
        let mut values: Vec<u64> =
            self.elements.iter().map(|e| map_to_range(siphash(key, e), nm)).collect();
        values.sort_unstable();
        values.dedup();

        let mut writer = BitWriter::new();
        let mut last = 0u64;
        for value in values {
            write_golomb(&mut writer, value - last);
            last = value;
        }
        content.extend_from_slice(&writer.finish());
        BlockFilter::new(content)
    }
}

/// SipHash key: the first 16 bytes of the block hash, little-endian words.
fn siphash_key(block_hash: &BlockHash) -> (u64, u64) {
    let bytes = block_hash.as_bytes();
    let k0 = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
    let k1 = u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes"));
    (k0, k1)
}

fn siphash(key: (u64, u64), data: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(key.0, key.1);
    hasher.write(data);
    hasher.finish()
}

/// `(h * nm) >> 64` without overflow.
fn map_to_range(hash: u64, nm: u64) -> u64 {
    ((hash as u128 * nm as u128) >> 64) as u64
}

fn read_golomb(reader: &mut BitReader) -> Option<u64> {
    let mut quotient = 0u64;
    while reader.read_bit()? {
        quotient += 1;
    }
    let remainder = reader.read_bits(GCS_P)?;
    Some(quotient * (1 << GCS_P) + remainder)
}

fn write_golomb(writer: &mut BitWriter, value: u64) {
    let quotient = value >> GCS_P;
    for _ in 0..quotient {
        writer.write_bit(true);
    }
    writer.write_bit(false);
    writer.write_bits(value & ((1 << GCS_P) - 1), GCS_P);
}

/// MSB-first bit reader.
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, position: 0 }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.data.get(self.position / 8)?;
        let bit = (byte >> (7 - (self.position % 8))) & 1;
        self.position += 1;
        Some(bit == 1)
    }

    fn read_bits(&mut self, count: u8) -> Option<u64> {
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Some(value)
    }
}

/// MSB-first bit writer.
struct BitWriter {
    bytes: Vec<u8>,
    bit_position: u8,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            bytes: Vec::new(),
            bit_position: 0,
        }
    }

    fn write_bit(&mut self, bit: bool) {
        if self.bit_position == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - self.bit_position);
        }
        self.bit_position = (self.bit_position + 1) % 8;
    }

    fn write_bits(&mut self, value: u64, count: u8) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
