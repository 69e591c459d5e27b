// SPDX-License-Identifier: CC0-1.0

//! Hash functions and 32-byte hash newtypes.
//!
//! All hashes are stored in internal (wire) byte order. `Display` and
//! `from_hex` use the conventional reversed big-endian presentation.

use std::fmt;
use std::io::{self, Read, Write};

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::consensus::encode::{Decodable, Encodable, Error};

/// SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut engine = Sha256::new();
    engine.update(data);
    engine.finalize().into()
}

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD-160(SHA-256(data)), the pubkey/script hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut engine = Ripemd160::new();
    engine.update(sha256(data));
    engine.finalize().into()
}

macro_rules! impl_hash_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; 32]);

        impl $name {
            /// All-zero hash.
            pub fn all_zeros() -> Self {
                Self([0u8; 32])
            }

            /// Construct from internal (wire-order) bytes.
            pub fn from_byte_array(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Internal (wire-order) bytes.
            pub fn to_byte_array(self) -> [u8; 32] {
                self.0
            }

            /// Internal (wire-order) bytes as a slice.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse the conventional reversed hex presentation.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                bytes.reverse();
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut reversed = self.0;
                reversed.reverse();
                f.write_str(&hex::encode(reversed))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }

        impl Encodable for $name {
            fn consensus_encode<W: Write + ?Sized>(
                &self,
                writer: &mut W,
            ) -> Result<usize, io::Error> {
                self.0.consensus_encode(writer)
            }
        }

        impl Decodable for $name {
            fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
                Ok(Self(<[u8; 32]>::consensus_decode(reader)?))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_hash_newtype! {
    /// A block hash.
    BlockHash
}

impl_hash_newtype! {
    /// A transaction id (dSHA-256 of the non-witness serialization).
    Txid
}

impl_hash_newtype! {
    /// SHA-256 of a raw compact filter.
    FilterHash
}

impl_hash_newtype! {
    /// An entry in the compact filter header chain.
    FilterHeader
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_known_vector() {
        // dSHA256("hello"), standard test vector.
        let hash = sha256d(b"hello");
        assert_eq!(
            hex::encode(hash),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn hash160_known_vector() {
        // HASH160 of the generator-point compressed pubkey.
        let pubkey = hex::decode(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        assert_eq!(
            hex::encode(hash160(&pubkey)),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn display_is_reversed_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        let hash = BlockHash::from_byte_array(bytes);
        assert!(hash.to_string().ends_with("ab"));
        assert_eq!(BlockHash::from_hex(&hash.to_string()).unwrap(), hash);
    }
}
