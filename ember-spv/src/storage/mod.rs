//! Key-value persistence for wallet state.
//!
//! The wallet stores flat string keys: `wallet_<id>_lastScannedHeight`,
//! `wallet_<id>_utxos` (a JSON array) and `address_book_v1_<id>` (a JSON
//! map). The storage layer itself is oblivious to the values' shapes.

pub mod disk;
pub mod memory;

use async_trait::async_trait;

use crate::error::StorageResult;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// An async key-value store with flat string keys.
#[async_trait]
pub trait WalletStorage: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value.
    async fn set(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value.
    async fn remove(&mut self, key: &str) -> StorageResult<()>;
}

/// Key for a wallet's last scanned height.
pub fn last_scanned_height_key(wallet_id: &str) -> String {
    format!("wallet_{}_lastScannedHeight", wallet_id)
}

/// Key for a wallet's UTXO set.
pub fn utxos_key(wallet_id: &str) -> String {
    format!("wallet_{}_utxos", wallet_id)
}

/// Key for a wallet's address cursor.
pub fn address_book_key(wallet_id: &str) -> String {
    format!("address_book_v1_{}", wallet_id)
}
