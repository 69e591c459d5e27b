//! Ember key derivation and address generation.
//!
//! This crate owns the hierarchical deterministic key tree: BIP32
//! extended keys, the BIP44 account layout, and per-type address
//! generation on top of `embercore`'s address codec. It deliberately does
//! not know anything about networking or UTXOs; the SPV client composes
//! it with the wallet repository.

pub mod account;
pub mod bip32;
pub mod error;
pub mod wallet;

pub use account::{Account, KeyChain, MAX_CHANGE_ADDRESSES, MAX_RECEIVE_ADDRESSES};
pub use bip32::{ChildNumber, DerivationPath, ExtendedPrivKey, ExtendedPubKey};
pub use error::{Error, Result};
pub use wallet::HdWallet;
