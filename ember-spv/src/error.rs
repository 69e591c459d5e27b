//! Error types for the Ember SPV client.

use std::io;

use thiserror::Error;

/// Main error type for the Ember SPV client.
#[derive(Debug, Error)]
pub enum SpvError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Network-related errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("No peer available for {0}")]
    NoPeerAvailable(&'static str),

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Message serialization error: {0}")]
    Serialization(#[from] embercore::consensus::encode::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Synchronization-related errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Sync timeout")]
    SyncTimeout,

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("Invalid sync state: {0}")]
    InvalidState(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Wallet-related errors.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet not initialized")]
    NotInitialized,

    #[error("insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds {
        /// Total required, including the estimated fee.
        needed: u64,
        /// Spendable value actually available.
        available: u64,
    },

    #[error("output below dust threshold: {0} sats")]
    DustOutput(u64),

    #[error("signature verification failed for input {0}")]
    SignatureInvalid(usize),

    #[error("cannot sign input {0}: unknown key")]
    UnknownKey(usize),

    #[error("outpoint {0} is not spendable")]
    UnspendableOutpoint(embercore::transaction::OutPoint),

    #[error("address limit reached for {0:?} chain")]
    AddressLimitReached(ember_wallet::KeyChain),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] embercore::address::Error),

    #[error("key derivation error: {0}")]
    Derivation(#[from] ember_wallet::Error),

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Type alias for Result with SpvError.
pub type Result<T> = std::result::Result<T, SpvError>;

/// Type alias for network operation results.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for sync operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for wallet operation results.
pub type WalletResult<T> = std::result::Result<T, WalletError>;
