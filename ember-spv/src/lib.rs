//! Ember SPV (Simplified Payment Verification) client library.
//!
//! This library implements a Neutrino-style light wallet client for the
//! Ember network:
//!
//! - Synchronizes block headers from the P2P network
//! - Downloads and chains BIP157 compact filter headers and filters
//! - Discovers wallet UTXOs by probing filters and fetching matching
//!   blocks
//! - Builds, signs (BIP143) and broadcasts transactions, verifying
//!   mempool acceptance
//! - Persists headers and wallet state to disk for quick restarts
//!
//! # Quick Start
//!
//! ```no_run
//! use ember_spv::client::{ClientConfig, SpvClient};
//! use ember_spv::storage::DiskStorage;
//! use ember_spv::wallet::WalletManager;
//! use ember_spv::clock::SystemClock;
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::mainnet()
//!         .with_data_dir("./.ember")
//!         .with_seed_peer("203.0.113.7:8757".parse()?);
//!
//!     let mut client = SpvClient::new(config.clone()).await?;
//!     client.connect().await?;
//!     client.sync_to_tip().await?;
//!
//!     let storage = DiskStorage::open(&config.data_dir).await?;
//!     let mut wallet = WalletManager::new(
//!         client.params().clone(),
//!         config.wallet_id.clone(),
//!         Box::new(storage),
//!         Arc::new(SystemClock),
//!     );
//!     wallet.load_seed(&[0u8; 32])?;
//!     wallet.load_state().await?;
//!     wallet.discover_utxos(&mut client, false, 1).await?;
//!
//!     println!("balance: {} sats", wallet.balance());
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod client;
pub mod clock;
pub mod error;
pub mod events;
pub mod network;
pub mod storage;
pub mod sync;
#[cfg(test)]
pub mod test_utils;
pub mod types;
pub mod wallet;

// Re-export main types for convenience.
pub use client::{ClientConfig, SpvClient};
pub use error::{
    NetworkError, Result, SpvError, StorageError, SyncError, WalletError,
};
pub use types::{BroadcastResult, ChainTip, PeerInfo, SpvStats, SyncPhase, SyncProgress};
pub use wallet::WalletManager;

// Re-export commonly used embercore types.
pub use embercore::{Address, BlockHash, ChainParams, Network, OutPoint, ScriptBuf, Txid};

/// Current version of the ember-spv library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
