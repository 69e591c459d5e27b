//! The header chain store.
//!
//! Headers live in three tiers: a small parsed-header cache, a queue of
//! raw records not yet persisted, and an append-only file of fixed-width
//! records. Heights are 1-based for stored headers; height 0 is the
//! genesis block, which is never stored. Only its hash is known, from
//! chain parameters.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use embercore::block::BlockHeader;
use embercore::hashes::BlockHash;
use embercore::params::ChainParams;

use crate::error::{StorageError, StorageResult};

/// Parsed headers kept in memory.
const HEADER_CACHE_CAPACITY: usize = 100;

/// Default flush batch size.
pub const FLUSH_BATCH_SIZE: usize = 2000;

/// Name of the header file inside the data directory.
const HEADER_FILE_NAME: &str = "headers.bin";

/// Bounded cache + pending queue + append-only file of headers.
pub struct HeaderChainStore {
    params: ChainParams,
    file_path: PathBuf,
    /// Parsed headers by height; evicts the lowest height past capacity.
    cache: BTreeMap<u32, BlockHeader>,
    /// Raw records for heights `persisted_count+1 ..= height()`.
    pending: VecDeque<Vec<u8>>,
    /// Heights of headers observed this session. May be incomplete for
    /// far-past records that were never loaded from disk.
    hash_index: HashMap<BlockHash, u32>,
    persisted_count: u32,
    tip_hash: BlockHash,
}

impl HeaderChainStore {
    /// Open (or create) the store under `data_dir`.
    pub async fn open(params: ChainParams, data_dir: &PathBuf) -> StorageResult<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let file_path = data_dir.join(HEADER_FILE_NAME);

        let record_len = params.header_length as u64;
        let mut persisted_count = 0u32;
        if let Ok(metadata) = tokio::fs::metadata(&file_path).await {
            let len = metadata.len();
            let whole = len / record_len;
            if len % record_len != 0 {
                tracing::warn!(
                    "Header file has a partial trailing record ({} bytes), truncating",
                    len % record_len
                );
                let file = OpenOptions::new().write(true).open(&file_path).await?;
                file.set_len(whole * record_len).await?;
            }
            persisted_count = whole as u32;
        }

        let mut store = HeaderChainStore {
            params,
            file_path,
            cache: BTreeMap::new(),
            pending: VecDeque::new(),
            hash_index: HashMap::new(),
            persisted_count,
            tip_hash: BlockHash::all_zeros(),
        };

        store.tip_hash = if persisted_count == 0 {
            store.params.genesis_hash()
        } else {
            let header = store
                .read_record(persisted_count)
                .await?
                .ok_or_else(|| StorageError::Corruption("missing tip record".to_string()))?;
            let hash = header.block_hash(&store.params);
            store.hash_index.insert(hash, persisted_count);
            store.cache_insert(persisted_count, header);
            hash
        };

        tracing::info!(
            "Opened header store with {} persisted headers",
            store.persisted_count
        );
        Ok(store)
    }

    /// Current chain height: persisted plus pending headers.
    pub fn height(&self) -> u32 {
        self.persisted_count + self.pending.len() as u32
    }

    /// Number of records on disk.
    pub fn persisted_count(&self) -> u32 {
        self.persisted_count
    }

    /// Number of headers not yet flushed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Hash of the tip header (the genesis hash when empty).
    pub fn tip_hash(&self) -> BlockHash {
        self.tip_hash
    }

    /// Height of a block observed this session, if known.
    pub fn height_of(&self, hash: &BlockHash) -> Option<u32> {
        if *hash == self.params.genesis_hash() {
            return Some(0);
        }
        self.hash_index.get(hash).copied()
    }

    /// A header from the cache or the pending queue. Does not touch disk.
    pub fn get_header(&self, height: u32) -> Option<BlockHeader> {
        if height == 0 || height > self.height() {
            return None;
        }
        if let Some(header) = self.cache.get(&height) {
            return Some(header.clone());
        }
        if height > self.persisted_count {
            let raw = &self.pending[(height - self.persisted_count - 1) as usize];
            return BlockHeader::from_raw(raw, &self.params).ok();
        }
        None
    }

    /// A header, reading from disk when it is not in memory.
    pub async fn get_header_async(&mut self, height: u32) -> StorageResult<Option<BlockHeader>> {
        if let Some(header) = self.get_header(height) {
            return Ok(Some(header));
        }
        if height == 0 || height > self.persisted_count {
            return Ok(None);
        }
        match self.read_record(height).await? {
            Some(header) => {
                self.cache_insert(height, header.clone());
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    /// The block hash at a height; height 0 is the genesis hash.
    pub fn get_block_hash(&self, height: u32) -> Option<BlockHash> {
        if height == 0 {
            return Some(self.params.genesis_hash());
        }
        if height == self.height() {
            return Some(self.tip_hash);
        }
        self.get_header(height).map(|h| h.block_hash(&self.params))
    }

    /// The block hash at a height, reading from disk when necessary.
    pub async fn get_block_hash_async(&mut self, height: u32) -> StorageResult<Option<BlockHash>> {
        if let Some(hash) = self.get_block_hash(height) {
            return Ok(Some(hash));
        }
        Ok(self
            .get_header_async(height)
            .await?
            .map(|h| h.block_hash(&self.params)))
    }

    /// Append a header. Returns false (and stores nothing) when the
    /// header is a duplicate or does not link to the current tip.
    pub fn add_header(&mut self, header: BlockHeader, raw: Vec<u8>) -> bool {
        debug_assert_eq!(raw.len(), self.params.header_length);

        let hash = header.block_hash(&self.params);
        if self.hash_index.contains_key(&hash) {
            return false;
        }
        if header.prev_blockhash != self.tip_hash {
            tracing::debug!(
                "Rejecting header {}: prev {} does not link to tip {}",
                hash,
                header.prev_blockhash,
                self.tip_hash
            );
            return false;
        }

        let height = self.height() + 1;
        self.pending.push_back(raw);
        self.hash_index.insert(hash, height);
        self.cache_insert(height, header);
        self.tip_hash = hash;
        true
    }

    /// Persist pending headers once at least `batch_size` have queued.
    /// Idempotent; on failure the queue is left intact.
    pub async fn flush_to_storage(&mut self, batch_size: usize) -> StorageResult<()> {
        if self.pending.len() < batch_size {
            return Ok(());
        }
        self.write_pending().await
    }

    /// Persist all pending headers regardless of count.
    pub async fn force_flush(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.write_pending().await
    }

    async fn write_pending(&mut self) -> StorageResult<()> {
        let drained: Vec<Vec<u8>> = self.pending.drain(..).collect();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await?;

        let mut written = 0usize;
        for record in &drained {
            if let Err(e) = file.write_all(record).await {
                // Re-insert everything unwritten at the head of the queue.
                for record in drained[written..].iter().rev() {
                    self.pending.push_front(record.clone());
                }
                self.persisted_count += written as u32;
                return Err(StorageError::WriteFailed(format!(
                    "header flush failed after {} records: {}",
                    written, e
                )));
            }
            written += 1;
        }
        file.flush().await?;
        self.persisted_count += written as u32;
        tracing::debug!(
            "Flushed {} headers; {} persisted total",
            written,
            self.persisted_count
        );
        Ok(())
    }

    /// Drop every header above `keep_count`, in memory and on disk.
    pub async fn truncate(&mut self, keep_count: u32) -> StorageResult<()> {
        if keep_count >= self.height() {
            return Ok(());
        }

        self.cache.retain(|&height, _| height <= keep_count);
        self.hash_index.retain(|_, height| *height <= keep_count);

        if keep_count >= self.persisted_count {
            self.pending.truncate((keep_count - self.persisted_count) as usize);
        } else {
            self.pending.clear();
            let file = OpenOptions::new().write(true).open(&self.file_path).await?;
            file.set_len(keep_count as u64 * self.params.header_length as u64).await?;
            self.persisted_count = keep_count;
        }

        self.tip_hash = if keep_count == 0 {
            self.params.genesis_hash()
        } else {
            self.get_header_async(keep_count)
                .await?
                .map(|h| h.block_hash(&self.params))
                .ok_or_else(|| StorageError::Corruption("missing header after truncate".into()))?
        };

        tracing::info!("Truncated header chain to height {}", keep_count);
        Ok(())
    }

    /// Clear all state, including the disk file.
    pub async fn reset(&mut self) -> StorageResult<()> {
        self.cache.clear();
        self.pending.clear();
        self.hash_index.clear();
        self.persisted_count = 0;
        self.tip_hash = self.params.genesis_hash();
        if tokio::fs::metadata(&self.file_path).await.is_ok() {
            let file = OpenOptions::new().write(true).open(&self.file_path).await?;
            file.set_len(0).await?;
        }
        Ok(())
    }

    /// Build a block locator: tip backwards with step 1 for the first ten
    /// entries, doubling afterwards, terminated by the genesis entry.
    pub async fn build_block_locator(&mut self) -> StorageResult<Vec<(u32, BlockHash)>> {
        let mut locator = Vec::new();
        let mut height = self.height();
        let mut step = 1u32;

        while height > 0 {
            if let Some(hash) = self.get_block_hash_async(height).await? {
                locator.push((height, hash));
            }
            if locator.len() >= 10 {
                step = step.saturating_mul(2);
            }
            if height <= step {
                break;
            }
            height -= step;
        }

        locator.push((0, self.params.genesis_hash()));
        Ok(locator)
    }

    fn cache_insert(&mut self, height: u32, header: BlockHeader) {
        self.cache.insert(height, header);
        while self.cache.len() > HEADER_CACHE_CAPACITY {
            let lowest = *self.cache.keys().next().expect("cache not empty");
            self.cache.remove(&lowest);
        }
    }

    async fn read_record(&self, height: u32) -> StorageResult<Option<BlockHeader>> {
        if height == 0 || height > self.persisted_count {
            return Ok(None);
        }
        let mut file = File::open(&self.file_path).await?;
        let offset = (height as u64 - 1) * self.params.header_length as u64;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut record = vec![0u8; self.params.header_length];
        file.read_exact(&mut record).await?;
        let header = BlockHeader::from_raw(&record, &self.params)
            .map_err(|e| StorageError::Corruption(format!("bad header record: {}", e)))?;
        Ok(Some(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercore::consensus::encode::serialize;
    use embercore::params::Network;
    use tempfile::TempDir;

    fn make_header(params: &ChainParams, prev: BlockHash, salt: u8) -> (BlockHeader, Vec<u8>) {
        let header = BlockHeader {
            version: 4,
            prev_blockhash: prev,
            merkle_root: [salt; 32],
            time: params.t2 + 1 + salt as u32,
            bits: 0x1D00_FFFF,
            nonce: salt as u32,
            proof: vec![salt; params.proof_length()],
        };
        let raw = serialize(&header);
        (header, raw)
    }

    async fn store_with_chain(dir: &TempDir, count: u8) -> HeaderChainStore {
        let params = Network::Regtest.params();
        let mut store =
            HeaderChainStore::open(params.clone(), &dir.path().to_path_buf()).await.unwrap();
        let mut prev = params.genesis_hash();
        for salt in 0..count {
            let (header, raw) = make_header(&params, prev, salt);
            prev = header.block_hash(&params);
            assert!(store.add_header(header, raw));
        }
        store
    }

    #[tokio::test]
    async fn genesis_hash_at_height_zero() {
        let dir = TempDir::new().unwrap();
        let store = store_with_chain(&dir, 0).await;
        assert_eq!(store.height(), 0);
        assert_eq!(
            store.get_block_hash(0).unwrap(),
            Network::Regtest.params().genesis_hash()
        );
    }

    #[tokio::test]
    async fn add_header_links_and_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let params = Network::Regtest.params();
        let mut store = store_with_chain(&dir, 3).await;
        assert_eq!(store.height(), 3);

        // Idempotence: re-adding the tip header fails and height holds.
        let tip = store.get_header(3).unwrap();
        let raw = serialize(&tip);
        assert!(!store.add_header(tip, raw));
        assert_eq!(store.height(), 3);

        // A header that does not link is rejected silently.
        let (unlinked, raw) = make_header(&params, BlockHash::from_byte_array([0xEE; 32]), 9);
        assert!(!store.add_header(unlinked, raw));
        assert_eq!(store.height(), 3);
    }

    #[tokio::test]
    async fn chain_linkage_invariant_holds() {
        let dir = TempDir::new().unwrap();
        let params = Network::Regtest.params();
        let store = store_with_chain(&dir, 10).await;
        for height in 2..=10 {
            let header = store.get_header(height).unwrap();
            let prev = store.get_header(height - 1).unwrap();
            assert_eq!(header.prev_blockhash, prev.block_hash(&params));
        }
        assert_eq!(store.get_header(1).unwrap().prev_blockhash, params.genesis_hash());
    }

    #[tokio::test]
    async fn flush_persists_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let params = Network::Regtest.params();
        let mut store = store_with_chain(&dir, 5).await;

        // Below the batch size nothing is written.
        store.flush_to_storage(FLUSH_BATCH_SIZE).await.unwrap();
        assert_eq!(store.persisted_count(), 0);
        assert_eq!(store.pending_count(), 5);

        store.force_flush().await.unwrap();
        assert_eq!(store.persisted_count(), 5);
        assert_eq!(store.pending_count(), 0);

        let on_disk = std::fs::metadata(dir.path().join(HEADER_FILE_NAME)).unwrap().len();
        assert_eq!(on_disk, 5 * params.header_length as u64);

        // A second flush is a no-op.
        store.force_flush().await.unwrap();
        assert_eq!(store.persisted_count(), 5);
    }

    #[tokio::test]
    async fn reopen_recovers_tip() {
        let dir = TempDir::new().unwrap();
        let params = Network::Regtest.params();
        let tip_hash = {
            let mut store = store_with_chain(&dir, 4).await;
            store.force_flush().await.unwrap();
            store.tip_hash()
        };

        let mut reopened =
            HeaderChainStore::open(params.clone(), &dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reopened.height(), 4);
        assert_eq!(reopened.tip_hash(), tip_hash);
        // Disk reads work for records outside the session cache.
        let header = reopened.get_header_async(1).await.unwrap().unwrap();
        assert_eq!(header.prev_blockhash, params.genesis_hash());
    }

    #[tokio::test]
    async fn truncate_discards_above_keep_count() {
        let dir = TempDir::new().unwrap();
        let mut store = store_with_chain(&dir, 8).await;
        store.force_flush().await.unwrap();

        let hash_at_5 = store.get_block_hash_async(5).await.unwrap().unwrap();
        store.truncate(5).await.unwrap();
        assert_eq!(store.height(), 5);
        assert_eq!(store.persisted_count(), 5);
        assert_eq!(store.tip_hash(), hash_at_5);
        assert!(store.get_header_async(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncate_within_pending_only() {
        let dir = TempDir::new().unwrap();
        let mut store = store_with_chain(&dir, 8).await;
        // Nothing persisted; everything pending.
        store.truncate(3).await.unwrap();
        assert_eq!(store.height(), 3);
        assert_eq!(store.pending_count(), 3);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let dir = TempDir::new().unwrap();
        let params = Network::Regtest.params();
        let mut store = store_with_chain(&dir, 6).await;
        store.force_flush().await.unwrap();
        store.reset().await.unwrap();
        assert_eq!(store.height(), 0);
        assert_eq!(store.tip_hash(), params.genesis_hash());
        assert_eq!(
            std::fs::metadata(dir.path().join(HEADER_FILE_NAME)).unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn locator_steps_and_ends_at_genesis() {
        let dir = TempDir::new().unwrap();
        let params = Network::Regtest.params();
        let mut store = store_with_chain(&dir, 50).await;

        let locator = store.build_block_locator().await.unwrap();
        assert_eq!(locator[0].0, 50);
        // First ten entries descend one by one.
        for i in 0..10 {
            assert_eq!(locator[i].0, 50 - i as u32);
        }
        // Afterwards the step doubles.
        assert_eq!(locator[10].0, 39);
        assert_eq!(locator[11].0, 35);
        assert_eq!(locator[12].0, 27);
        assert_eq!(locator[13].0, 11);
        assert_eq!(locator.last().unwrap(), &(0, params.genesis_hash()));
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let dir = TempDir::new().unwrap();
        let params = Network::Regtest.params();
        let mut store =
            HeaderChainStore::open(params.clone(), &dir.path().to_path_buf()).await.unwrap();
        let mut prev = params.genesis_hash();
        for salt in 0..150u32 {
            let header = BlockHeader {
                version: 4,
                prev_blockhash: prev,
                merkle_root: [0; 32],
                time: params.t2 + 1 + salt,
                bits: 0,
                nonce: salt,
                proof: vec![(salt % 251) as u8; params.proof_length()],
            };
            let raw = serialize(&header);
            prev = header.block_hash(&params);
            assert!(store.add_header(header, raw));
        }
        assert_eq!(store.cache.len(), HEADER_CACHE_CAPACITY);
        // Low heights were evicted from cache but remain in pending.
        assert!(store.get_header(1).is_some());
    }
}
