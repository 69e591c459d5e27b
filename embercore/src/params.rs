// SPDX-License-Identifier: CC0-1.0

//! Chain parameters.
//!
//! Everything chain-specific the rest of the workspace needs is collected
//! here and injected by value: the P2P magic, the on-wire header length
//! (80 canonical bytes plus the opaque proof blob), the address prefixes,
//! and the two timestamp cutovers that select the header hash function.

use std::fmt;

use crate::hashes::BlockHash;

/// Length of the canonical Bitcoin header fields within an Ember header.
pub const CANONICAL_HEADER_LEN: usize = 80;

/// The networks an Ember node can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The public test network.
    Testnet,
    /// A local regression-test network.
    Regtest,
}

impl Network {
    /// The chain parameters for this network.
    pub fn params(self) -> ChainParams {
        match self {
            Network::Mainnet => ChainParams {
                network: Network::Mainnet,
                magic: 0xC7E2_A4D1,
                default_port: 8757,
                header_length: 143,
                genesis_hash_hex: "00000d8e7d8e5a3c6f1b44bfa8d0e65c15a0c563e8b7c1de21ab1a93f3e80bd0",
                pubkey_address_prefix: 0x21,
                script_address_prefix: 0x37,
                bech32_hrp: "em",
                coin_type: 444,
                t1: 1_504_000_000,
                t2: 1_572_000_000,
            },
            Network::Testnet => ChainParams {
                network: Network::Testnet,
                magic: 0xD3B6_F0A2,
                default_port: 18757,
                header_length: 143,
                genesis_hash_hex: "000006b5c1e89f5b9d79e1c33ab2d8c8e3f5db91a62b68f9ce901f7ab3d5a1ee",
                pubkey_address_prefix: 0x6F,
                script_address_prefix: 0xC4,
                bech32_hrp: "tem",
                coin_type: 1,
                t1: 1_504_000_000,
                t2: 1_572_000_000,
            },
            Network::Regtest => ChainParams {
                network: Network::Regtest,
                magic: 0xFAD4_C1B8,
                default_port: 18767,
                header_length: 143,
                genesis_hash_hex: "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
                pubkey_address_prefix: 0x6F,
                script_address_prefix: 0xC4,
                bech32_hrp: "emrt",
                coin_type: 1,
                t1: 1_504_000_000,
                t2: 1_572_000_000,
            },
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(s)
    }
}

/// Injectable chain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// Which network these parameters describe.
    pub network: Network,
    /// P2P message magic, little-endian on the wire.
    pub magic: u32,
    /// Default P2P port.
    pub default_port: u16,
    /// Total serialized header length. The first 80 bytes carry the
    /// Bitcoin fields; the remainder is the opaque proof blob.
    pub header_length: usize,
    /// Genesis block hash in display (big-endian) hex.
    pub genesis_hash_hex: &'static str,
    /// Base58Check version byte for P2PKH addresses.
    pub pubkey_address_prefix: u8,
    /// Base58Check version byte for P2SH addresses.
    pub script_address_prefix: u8,
    /// Human-readable part for bech32/bech32m addresses.
    pub bech32_hrp: &'static str,
    /// BIP44 coin type.
    pub coin_type: u32,
    /// Headers with `time <= t1` hash the proof blob only (single SHA-256).
    pub t1: u32,
    /// Headers with `t1 < time <= t2` use dSHA-256 of the full header;
    /// later headers use a single SHA-256 of the full header.
    pub t2: u32,
}

impl ChainParams {
    /// Length of the proof blob that trails the canonical header fields.
    pub fn proof_length(&self) -> usize {
        self.header_length - CANONICAL_HEADER_LEN
    }

    /// The genesis hash in internal (little-endian wire) byte order.
    pub fn genesis_hash(&self) -> BlockHash {
        BlockHash::from_hex(self.genesis_hash_hex).expect("chain params carry valid genesis hex")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_length_is_header_minus_canonical() {
        let params = Network::Mainnet.params();
        assert_eq!(params.proof_length(), 63);
        assert!(params.header_length >= CANONICAL_HEADER_LEN);
    }

    #[test]
    fn genesis_hash_round_trips_display_order() {
        let params = Network::Mainnet.params();
        assert_eq!(params.genesis_hash().to_string(), params.genesis_hash_hex);
    }

    #[test]
    fn networks_have_distinct_magic() {
        let m = Network::Mainnet.params().magic;
        let t = Network::Testnet.params().magic;
        let r = Network::Regtest.params().magic;
        assert_ne!(m, t);
        assert_ne!(t, r);
        assert_ne!(m, r);
    }
}
