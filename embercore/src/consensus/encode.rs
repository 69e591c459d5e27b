// SPDX-License-Identifier: CC0-1.0

//! The shared binary codec.
//!
//! Every wire message, block, transaction and on-disk header record goes
//! through the [`Encodable`]/[`Decodable`] pair defined here. Integers are
//! little-endian, collections are length-prefixed with the Bitcoin compact
//! size ([`VarInt`]), and network payloads are wrapped in [`CheckedData`]
//! which carries the length and the first four bytes of a double-SHA-256
//! checksum.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::hashes::sha256d;
use crate::params::ChainParams;

/// Maximum size, in bytes, of a vector we are willing to decode.
pub const MAX_VEC_SIZE: usize = 4_000_000;

/// Encoding/decoding errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("allocation of oversized vector: requested {requested}, max {max}")]
    OversizedVectorAllocation {
        /// The capacity requested.
        requested: usize,
        /// The maximum capacity.
        max: usize,
    },

    #[error("invalid checksum: expected {expected}, actual {actual}")]
    InvalidChecksum {
        /// The expected checksum.
        expected: String,
        /// The checksum that was actually found.
        actual: String,
    },

    #[error("non-minimal varint")]
    NonMinimalVarInt,

    #[error("unexpected network magic: expected 0x{expected:08x}, actual 0x{actual:08x}")]
    UnexpectedNetworkMagic {
        /// The expected network magic.
        expected: u32,
        /// The magic that was actually found.
        actual: u32,
    },

    #[error("parse failed: {0}")]
    ParseFailed(&'static str),
}

/// Encode an object into a vector.
pub fn serialize<T: Encodable + ?Sized>(data: &T) -> Vec<u8> {
    let mut encoder = Vec::new();
    let len = data.consensus_encode(&mut encoder).expect("in-memory writers don't error");
    debug_assert_eq!(len, encoder.len());
    encoder
}

/// Deserialize an object from a vector, will error if said deserialization
/// doesn't consume the entire vector.
pub fn deserialize<T: Decodable>(data: &[u8]) -> Result<T, Error> {
    let (rv, consumed) = deserialize_partial(data)?;
    if consumed == data.len() {
        Ok(rv)
    } else {
        Err(Error::ParseFailed("data not consumed entirely when explicitly deserializing"))
    }
}

/// Deserialize an object from a vector, but will not report an error if
/// said deserialization doesn't consume the entire vector.
pub fn deserialize_partial<T: Decodable>(data: &[u8]) -> Result<(T, usize), Error> {
    let mut decoder = io::Cursor::new(data);
    let rv = Decodable::consensus_decode(&mut decoder)?;
    Ok((rv, decoder.position() as usize))
}

/// Data which can be encoded in a consensus-consistent way.
pub trait Encodable {
    /// Encodes an object with a well-defined format.
    ///
    /// Returns the number of bytes written on success.
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error>;
}

/// Data which can be decoded in a consensus-consistent way.
pub trait Decodable: Sized {
    /// Decode an object with a well-defined format.
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error>;
}

/// Data whose decoding depends on injected chain parameters (header
/// length, magic). Blocks and raw network messages fall in this bucket;
/// everything else implements plain [`Decodable`].
pub trait DecodableWithParams: Sized {
    /// Decode an object, consulting the chain parameters where the wire
    /// format is chain-specific.
    fn consensus_decode_with_params<R: Read + ?Sized>(
        reader: &mut R,
        params: &ChainParams,
    ) -> Result<Self, Error>;
}

macro_rules! impl_int_encodable {
    ($ty:ty, $meth_dec:ident, $meth_enc:ident) => {
        impl Encodable for $ty {
            #[inline]
            fn consensus_encode<W: Write + ?Sized>(
                &self,
                writer: &mut W,
            ) -> Result<usize, io::Error> {
                writer.write_all(&self.to_le_bytes())?;
                Ok(core::mem::size_of::<$ty>())
            }
        }

        impl Decodable for $ty {
            #[inline]
            fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
                let mut buf = [0u8; core::mem::size_of::<$ty>()];
                reader.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    };
}

impl_int_encodable!(u8, read_u8, emit_u8);
impl_int_encodable!(u16, read_u16, emit_u16);
impl_int_encodable!(u32, read_u32, emit_u32);
impl_int_encodable!(u64, read_u64, emit_u64);
impl_int_encodable!(i32, read_i32, emit_i32);
impl_int_encodable!(i64, read_i64, emit_i64);

impl Encodable for bool {
    #[inline]
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        u8::from(*self).consensus_encode(writer)
    }
}

impl Decodable for bool {
    #[inline]
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(u8::consensus_decode(reader)? != 0)
    }
}

impl<const N: usize> Encodable for [u8; N] {
    #[inline]
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_all(self)?;
        Ok(N)
    }
}

impl<const N: usize> Decodable for [u8; N] {
    #[inline]
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let mut buf = [0u8; N];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// A variable-length unsigned integer (Bitcoin compact size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarInt(pub u64);

impl VarInt {
    /// Length of the serialized form.
    pub fn len(&self) -> usize {
        match self.0 {
            0..=0xFC => 1,
            0xFD..=0xFFFF => 3,
            0x1_0000..=0xFFFF_FFFF => 5,
            _ => 9,
        }
    }
}

impl Encodable for VarInt {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self.0 {
            0..=0xFC => {
                (self.0 as u8).consensus_encode(writer)?;
                Ok(1)
            }
            0xFD..=0xFFFF => {
                writer.write_all(&[0xFD])?;
                (self.0 as u16).consensus_encode(writer)?;
                Ok(3)
            }
            0x1_0000..=0xFFFF_FFFF => {
                writer.write_all(&[0xFE])?;
                (self.0 as u32).consensus_encode(writer)?;
                Ok(5)
            }
            _ => {
                writer.write_all(&[0xFF])?;
                self.0.consensus_encode(writer)?;
                Ok(9)
            }
        }
    }
}

impl Decodable for VarInt {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let n = u8::consensus_decode(reader)?;
        match n {
            0xFF => {
                let x = u64::consensus_decode(reader)?;
                if x < 0x1_0000_0000 {
                    Err(Error::NonMinimalVarInt)
                } else {
                    Ok(VarInt(x))
                }
            }
            0xFE => {
                let x = u32::consensus_decode(reader)?;
                if x < 0x1_0000 {
                    Err(Error::NonMinimalVarInt)
                } else {
                    Ok(VarInt(x as u64))
                }
            }
            0xFD => {
                let x = u16::consensus_decode(reader)?;
                if x < 0xFD {
                    Err(Error::NonMinimalVarInt)
                } else {
                    Ok(VarInt(x as u64))
                }
            }
            n => Ok(VarInt(n as u64)),
        }
    }
}

impl Encodable for Vec<u8> {
    #[inline]
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = VarInt(self.len() as u64).consensus_encode(writer)?;
        writer.write_all(self)?;
        len += self.len();
        Ok(len)
    }
}

impl Decodable for Vec<u8> {
    #[inline]
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let len = VarInt::consensus_decode(reader)?.0 as usize;
        if len > MAX_VEC_SIZE {
            return Err(Error::OversizedVectorAllocation {
                requested: len,
                max: MAX_VEC_SIZE,
            });
        }
        let mut ret = vec![0u8; len];
        reader.read_exact(&mut ret)?;
        Ok(ret)
    }
}

impl Encodable for String {
    #[inline]
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let bytes = self.as_bytes();
        let mut len = VarInt(bytes.len() as u64).consensus_encode(writer)?;
        writer.write_all(bytes)?;
        len += bytes.len();
        Ok(len)
    }
}

impl Decodable for String {
    #[inline]
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let bytes = Vec::<u8>::consensus_decode(reader)?;
        String::from_utf8(bytes).map_err(|_| Error::ParseFailed("invalid utf-8 in varstr"))
    }
}

/// Encode a vector of encodable items with a leading [`VarInt`] count.
pub(crate) fn encode_vec<T: Encodable, W: Write + ?Sized>(
    items: &[T],
    writer: &mut W,
) -> Result<usize, io::Error> {
    let mut len = VarInt(items.len() as u64).consensus_encode(writer)?;
    for item in items {
        len += item.consensus_encode(writer)?;
    }
    Ok(len)
}

/// Decode a vector of decodable items with a leading [`VarInt`] count.
///
/// `per_item` is a lower bound on the serialized size of one item and is
/// used to reject counts that could not possibly fit in a sane message.
pub(crate) fn decode_vec<T: Decodable, R: Read + ?Sized>(
    reader: &mut R,
    per_item: usize,
) -> Result<Vec<T>, Error> {
    let count = VarInt::consensus_decode(reader)?.0 as usize;
    if count.saturating_mul(per_item.max(1)) > MAX_VEC_SIZE {
        return Err(Error::OversizedVectorAllocation {
            requested: count,
            max: MAX_VEC_SIZE / per_item.max(1),
        });
    }
    let mut ret = Vec::with_capacity(count);
    for _ in 0..count {
        ret.push(T::consensus_decode(reader)?);
    }
    Ok(ret)
}

/// Payload bytes prefixed with their length and a dSHA-256 checksum.
///
/// This is the body of every framed network message: the length and
/// checksum land in the 24-byte message header, the data follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedData(pub Vec<u8>);

impl CheckedData {
    /// First four bytes of `dSHA256(data)`.
    pub fn checksum(data: &[u8]) -> [u8; 4] {
        let hash = sha256d(data);
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

impl Encodable for CheckedData {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        (self.0.len() as u32).consensus_encode(writer)?;
        Self::checksum(&self.0).consensus_encode(writer)?;
        writer.write_all(&self.0)?;
        Ok(8 + self.0.len())
    }
}

impl Decodable for CheckedData {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let len = u32::consensus_decode(reader)? as usize;
        if len > MAX_VEC_SIZE {
            return Err(Error::OversizedVectorAllocation {
                requested: len,
                max: MAX_VEC_SIZE,
            });
        }
        let checksum = <[u8; 4]>::consensus_decode(reader)?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let expected = Self::checksum(&data);
        if expected != checksum {
            return Err(Error::InvalidChecksum {
                expected: hex::encode(expected),
                actual: hex::encode(checksum),
            });
        }
        Ok(CheckedData(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, 0x1_0000_0000] {
            let encoded = serialize(&VarInt(value));
            assert_eq!(encoded.len(), VarInt(value).len());
            let decoded: VarInt = deserialize(&encoded).unwrap();
            assert_eq!(decoded.0, value);
        }
    }

    #[test]
    fn varint_non_minimal_rejected() {
        // 0xFC encoded with the 0xFD (u16) form.
        assert!(matches!(
            deserialize::<VarInt>(&[0xFD, 0xFC, 0x00]),
            Err(Error::NonMinimalVarInt)
        ));
        // 0xFFFF encoded with the 0xFE (u32) form.
        assert!(matches!(
            deserialize::<VarInt>(&[0xFE, 0xFF, 0xFF, 0x00, 0x00]),
            Err(Error::NonMinimalVarInt)
        ));
    }

    #[test]
    fn int_encoding_is_little_endian() {
        assert_eq!(serialize(&0x1234_5678u32), [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(serialize(&0x01u8), [0x01]);
    }

    #[test]
    fn checked_data_roundtrip() {
        let data = CheckedData(b"ember".to_vec());
        let encoded = serialize(&data);
        let decoded: CheckedData = deserialize(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn checked_data_detects_corruption() {
        let data = CheckedData(b"ember".to_vec());
        let mut encoded = serialize(&data);
        let last = encoded.len() - 1;
        encoded[last] ^= 0x40;
        assert!(matches!(
            deserialize::<CheckedData>(&encoded),
            Err(Error::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn varstr_roundtrip() {
        let s = "/rust-ember-spv:0.1.0/".to_string();
        let decoded: String = deserialize(&serialize(&s)).unwrap();
        assert_eq!(decoded, s);
    }
}
