// SPDX-License-Identifier: CC0-1.0

//! Consensus-critical binary encoding.

pub mod encode;

pub use encode::{
    deserialize, deserialize_partial, serialize, CheckedData, Decodable, DecodableWithParams,
    Encodable, Error, VarInt,
};
