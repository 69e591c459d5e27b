//! Disk-backed key-value storage.
//!
//! One JSON file per wallet directory, loaded at open and rewritten on
//! every mutation. Wallet state is small (a UTXO set and two scalars), so
//! write-through keeps crash behavior simple: the file is always a
//! complete snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::storage::WalletStorage;

const STORE_FILE_NAME: &str = "wallet-store.json";

/// A `WalletStorage` persisted as a single JSON object.
pub struct DiskStorage {
    file_path: PathBuf,
    values: BTreeMap<String, String>,
}

impl DiskStorage {
    /// Open (or create) the store under `data_dir`.
    pub async fn open(data_dir: &Path) -> StorageResult<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let file_path = data_dir.join(STORE_FILE_NAME);

        let values = match tokio::fs::read_to_string(&file_path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StorageError::Corruption(format!("wallet store unreadable: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(DiskStorage { file_path, values })
    }

    async fn persist(&self) -> StorageResult<()> {
        let contents = serde_json::to_string_pretty(&self.values)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.file_path, contents)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }
}

#[async_trait]
impl WalletStorage for DiskStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    async fn set(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.persist().await
    }

    async fn remove(&mut self, key: &str) -> StorageResult<()> {
        if self.values.remove(key).is_some() {
            self.persist().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut storage = DiskStorage::open(dir.path()).await.unwrap();
            storage.set("wallet_w1_lastScannedHeight", "1234").await.unwrap();
            storage.set("address_book_v1_w1", "{\"2\":5}").await.unwrap();
        }

        let storage = DiskStorage::open(dir.path()).await.unwrap();
        assert_eq!(
            storage.get("wallet_w1_lastScannedHeight").await.unwrap(),
            Some("1234".to_string())
        );
        assert_eq!(
            storage.get("address_book_v1_w1").await.unwrap(),
            Some("{\"2\":5}".to_string())
        );
    }

    #[tokio::test]
    async fn corrupted_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STORE_FILE_NAME), b"not-json{").unwrap();
        assert!(matches!(
            DiskStorage::open(dir.path()).await,
            Err(StorageError::Corruption(_))
        ));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut storage = DiskStorage::open(dir.path()).await.unwrap();
        storage.set("k", "v").await.unwrap();
        storage.remove("k").await.unwrap();
        storage.remove("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }
}
