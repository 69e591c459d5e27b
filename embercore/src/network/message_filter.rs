// SPDX-License-Identifier: CC0-1.0

//! BIP157 filter messages.

use std::io::{self, Read, Write};

use crate::consensus::encode::{decode_vec, encode_vec, Decodable, Encodable, Error};
use crate::hashes::{BlockHash, FilterHash, FilterHeader};

/// The basic (BIP158) filter type byte.
pub const FILTER_TYPE_BASIC: u8 = 0x00;

/// `getcfilters`: request filters for a height range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCFilters {
    /// Filter type; only basic filters are defined.
    pub filter_type: u8,
    /// First height to fetch.
    pub start_height: u32,
    /// Hash of the last block in the range.
    pub stop_hash: BlockHash,
}

impl Encodable for GetCFilters {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.filter_type.consensus_encode(writer)?;
        len += self.start_height.consensus_encode(writer)?;
        len += self.stop_hash.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for GetCFilters {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(GetCFilters {
            filter_type: u8::consensus_decode(reader)?,
            start_height: u32::consensus_decode(reader)?,
            stop_hash: BlockHash::consensus_decode(reader)?,
        })
    }
}

/// `cfilter`: one filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFilter {
    /// Filter type.
    pub filter_type: u8,
    /// The block this filter covers.
    pub block_hash: BlockHash,
    /// The raw filter bytes.
    pub filter: Vec<u8>,
}

impl Encodable for CFilter {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.filter_type.consensus_encode(writer)?;
        len += self.block_hash.consensus_encode(writer)?;
        len += self.filter.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for CFilter {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(CFilter {
            filter_type: u8::consensus_decode(reader)?,
            block_hash: BlockHash::consensus_decode(reader)?,
            filter: Vec::<u8>::consensus_decode(reader)?,
        })
    }
}

/// `getcfheaders`: request filter headers for a height range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCFHeaders {
    /// Filter type.
    pub filter_type: u8,
    /// First height to fetch.
    pub start_height: u32,
    /// Hash of the last block in the range.
    pub stop_hash: BlockHash,
}

impl Encodable for GetCFHeaders {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.filter_type.consensus_encode(writer)?;
        len += self.start_height.consensus_encode(writer)?;
        len += self.stop_hash.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for GetCFHeaders {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(GetCFHeaders {
            filter_type: u8::consensus_decode(reader)?,
            start_height: u32::consensus_decode(reader)?,
            stop_hash: BlockHash::consensus_decode(reader)?,
        })
    }
}

/// `cfheaders`: a batch of filter hashes anchored to a previous header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFHeaders {
    /// Filter type.
    pub filter_type: u8,
    /// Hash of the last block in the range.
    pub stop_hash: BlockHash,
    /// The filter header preceding the first entry.
    pub previous_filter_header: FilterHeader,
    /// Filter hashes for consecutive heights.
    pub filter_hashes: Vec<FilterHash>,
}

impl Encodable for CFHeaders {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.filter_type.consensus_encode(writer)?;
        len += self.stop_hash.consensus_encode(writer)?;
        len += self.previous_filter_header.consensus_encode(writer)?;
        len += encode_vec(&self.filter_hashes, writer)?;
        Ok(len)
    }
}

impl Decodable for CFHeaders {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(CFHeaders {
            filter_type: u8::consensus_decode(reader)?,
            stop_hash: BlockHash::consensus_decode(reader)?,
            previous_filter_header: FilterHeader::consensus_decode(reader)?,
            filter_hashes: decode_vec(reader, 32)?,
        })
    }
}

/// `getcfcheckpt`: request the checkpoint chain up to a stop hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCFCheckpt {
    /// Filter type.
    pub filter_type: u8,
    /// Hash of the last block to cover.
    pub stop_hash: BlockHash,
}

impl Encodable for GetCFCheckpt {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.filter_type.consensus_encode(writer)?;
        len += self.stop_hash.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for GetCFCheckpt {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(GetCFCheckpt {
            filter_type: u8::consensus_decode(reader)?,
            stop_hash: BlockHash::consensus_decode(reader)?,
        })
    }
}

/// `cfcheckpt`: filter headers at 1000-block intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFCheckpt {
    /// Filter type.
    pub filter_type: u8,
    /// Hash of the last block covered.
    pub stop_hash: BlockHash,
    /// One header per checkpoint interval.
    pub filter_headers: Vec<FilterHeader>,
}

impl Encodable for CFCheckpt {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.filter_type.consensus_encode(writer)?;
        len += self.stop_hash.consensus_encode(writer)?;
        len += encode_vec(&self.filter_headers, writer)?;
        Ok(len)
    }
}

impl Decodable for CFCheckpt {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(CFCheckpt {
            filter_type: u8::consensus_decode(reader)?,
            stop_hash: BlockHash::consensus_decode(reader)?,
            filter_headers: decode_vec(reader, 32)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::encode::{deserialize, serialize};

    #[test]
    fn cfheaders_roundtrip() {
        let msg = CFHeaders {
            filter_type: FILTER_TYPE_BASIC,
            stop_hash: BlockHash::from_byte_array([5u8; 32]),
            previous_filter_header: FilterHeader::from_byte_array([6u8; 32]),
            filter_hashes: vec![
                FilterHash::from_byte_array([7u8; 32]),
                FilterHash::from_byte_array([8u8; 32]),
            ],
        };
        let decoded: CFHeaders = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn cfilter_roundtrip() {
        let msg = CFilter {
            filter_type: FILTER_TYPE_BASIC,
            block_hash: BlockHash::from_byte_array([1u8; 32]),
            filter: vec![0x01, 0x7F, 0x80],
        };
        let decoded: CFilter = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn cfcheckpt_roundtrip() {
        let msg = CFCheckpt {
            filter_type: FILTER_TYPE_BASIC,
            stop_hash: BlockHash::from_byte_array([2u8; 32]),
            filter_headers: (0..3).map(|i| FilterHeader::from_byte_array([i; 32])).collect(),
        };
        let decoded: CFCheckpt = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }
}
