// SPDX-License-Identifier: CC0-1.0

//! Ember chain primitives.
//!
//! This crate provides everything below the SPV client: the consensus
//! binary codec, block headers with the chain's timestamp-dependent hash
//! rules, transactions (segwit-aware), scripts and the address codec,
//! BIP158 compact block filters, the BIP143 signature hash, and the P2P
//! network message set.
//!
//! Chain specifics (magic, header length, address prefixes, hash-rule
//! cutover timestamps) are injected through [`ChainParams`] rather than
//! baked into the types, so the same code drives mainnet, testnet and
//! regtest.

pub mod address;
pub mod bip158;
pub mod block;
pub mod consensus;
pub mod hashes;
pub mod network;
pub mod params;
pub mod script;
pub mod sighash;
pub mod transaction;

pub use address::{Address, AddressType};
pub use block::{Block, BlockHeader};
pub use hashes::{BlockHash, FilterHash, FilterHeader, Txid};
pub use params::{ChainParams, Network};
pub use script::ScriptBuf;
pub use transaction::{OutPoint, Transaction, TxIn, TxOut};

/// Current version of the embercore library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
