//! Error types for key derivation.

use thiserror::Error;

/// Errors produced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("wallet not initialized")]
    NotInitialized,

    #[error("invalid child number {0}")]
    InvalidChildNumber(u32),

    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("address index {index} exceeds the cap {max}")]
    AddressIndexOutOfRange {
        /// The requested index.
        index: u32,
        /// The exclusive cap for this key chain.
        max: u32,
    },

    #[error("invalid seed")]
    InvalidSeed,

    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),

    #[error("address error: {0}")]
    Address(#[from] embercore::address::Error),
}

/// Type alias for Result with this crate's error.
pub type Result<T> = std::result::Result<T, Error>;
