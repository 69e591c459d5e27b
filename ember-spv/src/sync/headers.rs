//! Header synchronization.
//!
//! A request/response state machine over `getheaders`/`headers`. The
//! client facade pumps incoming messages into
//! [`HeaderSyncManager::handle_headers`]; each batch either chains the
//! next request, completes the sync, or reports a stall.

use std::sync::Arc;
use std::time::{Duration, Instant};

use embercore::block::BlockHeader;
use embercore::consensus::encode::serialize;
use embercore::hashes::BlockHash;
use embercore::network::message::NetworkMessage;
use embercore::network::message_blockdata::GetHeadersMessage;

use crate::chain::store::{HeaderChainStore, FLUSH_BATCH_SIZE};
use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::network::{NetworkManager, PeerPurpose};

/// Minimum spacing between requests for the same local height.
const REQUEST_THROTTLE: Duration = Duration::from_secs(30);

/// Largest tip delta for which `inv`-announced blocks produce per-height
/// new-block notifications rather than a plain catch-up.
const NEW_BLOCK_NOTIFY_LIMIT: u32 = 10;

/// How long a block `inv` stays armed waiting for headers.
const BLOCK_INV_WINDOW: Duration = Duration::from_secs(10);

/// The result of processing one `headers` batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersOutcome {
    /// Headers were added and more are expected.
    Progress {
        /// Number of headers accepted from this batch.
        added: u32,
    },
    /// The chain reached the target height.
    Complete,
    /// No progress was made while still below the target.
    Stalled,
}

/// Manages header synchronization.
pub struct HeaderSyncManager {
    clock: Arc<dyn Clock>,
    target_height: u32,
    syncing: bool,
    last_request_height: Option<u32>,
    last_request_at: Option<Instant>,
    /// Armed by a block `inv`: the tip height when the inv arrived.
    block_inv_watch: Option<(u32, Instant)>,
}

impl HeaderSyncManager {
    /// Create a new header sync manager.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        HeaderSyncManager {
            clock,
            target_height: 0,
            syncing: false,
            last_request_height: None,
            last_request_at: None,
            block_inv_watch: None,
        }
    }

    /// Raise the target height from a peer announcement.
    pub fn observe_peer_height(&mut self, height: u32) {
        if height > self.target_height {
            tracing::debug!("Target height raised to {}", height);
            self.target_height = height;
        }
    }

    /// The height we are syncing toward.
    pub fn target_height(&self) -> u32 {
        self.target_height
    }

    /// Whether a sync is in flight.
    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    /// Whether the local chain has reached the target.
    pub fn is_synced(&self, store: &HeaderChainStore) -> bool {
        store.height() >= self.target_height
    }

    /// Start a sync toward the best known peer height. Returns false if
    /// the chain is already at the target and nothing was requested.
    pub async fn begin_sync(
        &mut self,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<bool> {
        if self.syncing {
            return Err(SyncError::SyncInProgress);
        }
        if let Some(height) = network.best_peer_height() {
            self.observe_peer_height(height);
        }
        if self.is_synced(store) {
            tracing::info!("Headers already at target height {}", self.target_height);
            return Ok(false);
        }

        tracing::info!(
            "Starting header sync: {} -> {}",
            store.height(),
            self.target_height
        );
        self.syncing = true;
        self.request_headers(network, store, true).await?;
        Ok(true)
    }

    /// Send a `getheaders` request, throttled per local height.
    pub async fn request_headers(
        &mut self,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
        force: bool,
    ) -> SyncResult<()> {
        let local_height = store.height();
        if !force {
            if let (Some(last_height), Some(last_at)) =
                (self.last_request_height, self.last_request_at)
            {
                if last_height == local_height
                    && self.clock.now().saturating_duration_since(last_at) < REQUEST_THROTTLE
                {
                    tracing::debug!(
                        "Suppressing header request at height {} (throttled)",
                        local_height
                    );
                    return Ok(());
                }
            }
        }

        let locator = store
            .build_block_locator()
            .await
            .map_err(|e| SyncError::Storage(format!("Failed to build locator: {}", e)))?;
        let hashes: Vec<BlockHash> = locator.into_iter().map(|(_, hash)| hash).collect();
        let message =
            NetworkMessage::GetHeaders(GetHeadersMessage::new(hashes, BlockHash::all_zeros()));

        let peer = network
            .select_peer(PeerPurpose::Headers)
            .ok_or(SyncError::Network("no peer available for headers".to_string()))?;
        network
            .send(peer, message)
            .await
            .map_err(|e| SyncError::Network(format!("Failed to send getheaders: {}", e)))?;

        self.last_request_height = Some(local_height);
        self.last_request_at = Some(self.clock.now());
        tracing::debug!("Requested headers above height {}", local_height);
        Ok(())
    }

    /// Process a `headers` batch.
    pub async fn handle_headers(
        &mut self,
        headers: Vec<BlockHeader>,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<HeadersOutcome> {
        let mut added = 0u32;
        for header in headers {
            let raw = serialize(&header);
            if store.add_header(header, raw) {
                added += 1;
            }
        }
        if added > 0 {
            store
                .flush_to_storage(FLUSH_BATCH_SIZE)
                .await
                .map_err(|e| SyncError::Storage(format!("Failed to flush headers: {}", e)))?;
        }

        let local_height = store.height();
        if local_height > self.target_height {
            self.target_height = local_height;
        }

        if added > 0 && local_height < self.target_height {
            // Chained pagination: immediately ask for the next batch.
            tracing::debug!(
                "Accepted {} headers, now at {}/{}; requesting more",
                added,
                local_height,
                self.target_height
            );
            self.request_headers(network, store, true).await?;
            return Ok(HeadersOutcome::Progress { added });
        }

        store
            .force_flush()
            .await
            .map_err(|e| SyncError::Storage(format!("Failed to flush headers: {}", e)))?;

        if added == 0 && local_height < self.target_height {
            tracing::warn!(
                "Header sync stalled at {}/{}",
                local_height,
                self.target_height
            );
            self.syncing = false;
            return Ok(HeadersOutcome::Stalled);
        }

        tracing::info!("Header sync complete at height {}", local_height);
        self.syncing = false;
        Ok(HeadersOutcome::Complete)
    }

    /// Note a `MSG_BLOCK` inventory announcement. The caller schedules a
    /// delayed header pull; the tip recorded here determines which
    /// heights count as "new" when the headers arrive.
    pub fn note_block_inv(&mut self, store: &HeaderChainStore) {
        if self.block_inv_watch.is_none() {
            self.block_inv_watch = Some((store.height(), self.clock.now()));
        }
    }

    /// After headers were processed, the heights to announce through
    /// `on_new_block`. Empty unless a block `inv` armed the watch
    /// recently and the tip advanced by at most a small delta.
    pub fn take_new_block_heights(&mut self, store: &HeaderChainStore) -> Vec<u32> {
        let Some((tip_before, armed_at)) = self.block_inv_watch.take() else {
            return Vec::new();
        };
        if self.clock.now().saturating_duration_since(armed_at) > BLOCK_INV_WINDOW {
            return Vec::new();
        }
        let tip_after = store.height();
        if tip_after <= tip_before || tip_after - tip_before > NEW_BLOCK_NOTIFY_LIMIT {
            return Vec::new();
        }
        (tip_before + 1..=tip_after).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::test_utils::MockNetworkManager;
    use embercore::params::{ChainParams, Network};
    use tempfile::TempDir;

    fn chain_of(params: &ChainParams, count: u8) -> Vec<BlockHeader> {
        let mut headers = Vec::new();
        let mut prev = params.genesis_hash();
        for salt in 0..count {
            let header = BlockHeader {
                version: 4,
                prev_blockhash: prev,
                merkle_root: [salt; 32],
                time: params.t2 + 1 + salt as u32,
                bits: 0,
                nonce: salt as u32,
                proof: vec![salt; params.proof_length()],
            };
            prev = header.block_hash(params);
            headers.push(header);
        }
        headers
    }

    async fn empty_store(dir: &TempDir) -> HeaderChainStore {
        HeaderChainStore::open(Network::Regtest.params(), &dir.path().to_path_buf())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sync_from_empty_to_announced_tip() {
        let params = Network::Regtest.params();
        let dir = TempDir::new().unwrap();
        let mut store = empty_store(&dir).await;
        let mut network = MockNetworkManager::new(3);
        let clock = Arc::new(MockClock::new());
        let mut sync = HeaderSyncManager::new(clock);

        assert!(sync.begin_sync(&mut network, &mut store).await.unwrap());
        assert_eq!(network.sent_commands(), vec!["getheaders"]);

        let headers = chain_of(&params, 3);
        let outcome = sync.handle_headers(headers, &mut network, &mut store).await.unwrap();
        assert_eq!(outcome, HeadersOutcome::Complete);
        assert_eq!(store.height(), 3);
        assert_eq!(store.persisted_count() + store.pending_count() as u32, 3);
        assert_eq!(store.get_block_hash(0).unwrap(), params.genesis_hash());
        assert!(!sync.is_syncing());
    }

    #[tokio::test]
    async fn progress_chains_another_request() {
        let params = Network::Regtest.params();
        let dir = TempDir::new().unwrap();
        let mut store = empty_store(&dir).await;
        let mut network = MockNetworkManager::new(10);
        let mut sync = HeaderSyncManager::new(Arc::new(MockClock::new()));

        sync.begin_sync(&mut network, &mut store).await.unwrap();
        let outcome = sync
            .handle_headers(chain_of(&params, 4), &mut network, &mut store)
            .await
            .unwrap();
        assert_eq!(outcome, HeadersOutcome::Progress { added: 4 });
        // Initial request plus the chained follow-up.
        assert_eq!(network.sent_commands(), vec!["getheaders", "getheaders"]);
        assert!(sync.is_syncing());
    }

    #[tokio::test]
    async fn empty_batch_below_target_is_a_stall() {
        let dir = TempDir::new().unwrap();
        let mut store = empty_store(&dir).await;
        let mut network = MockNetworkManager::new(5);
        let mut sync = HeaderSyncManager::new(Arc::new(MockClock::new()));

        sync.begin_sync(&mut network, &mut store).await.unwrap();
        let outcome = sync.handle_headers(Vec::new(), &mut network, &mut store).await.unwrap();
        assert_eq!(outcome, HeadersOutcome::Stalled);
        assert!(!sync.is_syncing());
    }

    #[tokio::test]
    async fn throttle_suppresses_same_height_requests() {
        let dir = TempDir::new().unwrap();
        let mut store = empty_store(&dir).await;
        let mut network = MockNetworkManager::new(5);
        let clock = Arc::new(MockClock::new());
        let mut sync = HeaderSyncManager::new(clock.clone());

        sync.request_headers(&mut network, &mut store, false).await.unwrap();
        sync.request_headers(&mut network, &mut store, false).await.unwrap();
        assert_eq!(network.sent.len(), 1, "second request should be throttled");

        // Force bypasses the throttle.
        sync.request_headers(&mut network, &mut store, true).await.unwrap();
        assert_eq!(network.sent.len(), 2);

        // After the throttle window the request goes out again.
        clock.advance(Duration::from_secs(31));
        sync.request_headers(&mut network, &mut store, false).await.unwrap();
        assert_eq!(network.sent.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_headers_add_nothing() {
        let params = Network::Regtest.params();
        let dir = TempDir::new().unwrap();
        let mut store = empty_store(&dir).await;
        let mut network = MockNetworkManager::new(3);
        let mut sync = HeaderSyncManager::new(Arc::new(MockClock::new()));

        sync.begin_sync(&mut network, &mut store).await.unwrap();
        let headers = chain_of(&params, 3);
        sync.handle_headers(headers.clone(), &mut network, &mut store).await.unwrap();

        // The same batch again: no additions, already at target.
        sync.syncing = true;
        let outcome = sync.handle_headers(headers, &mut network, &mut store).await.unwrap();
        assert_eq!(outcome, HeadersOutcome::Complete);
        assert_eq!(store.height(), 3);
    }

    #[tokio::test]
    async fn block_inv_watch_reports_small_deltas() {
        let params = Network::Regtest.params();
        let dir = TempDir::new().unwrap();
        let mut store = empty_store(&dir).await;
        let mut network = MockNetworkManager::new(0);
        let mut sync = HeaderSyncManager::new(Arc::new(MockClock::new()));

        let headers = chain_of(&params, 5);
        sync.handle_headers(headers[..3].to_vec(), &mut network, &mut store).await.unwrap();

        sync.note_block_inv(&store);
        sync.handle_headers(headers[3..].to_vec(), &mut network, &mut store).await.unwrap();
        assert_eq!(sync.take_new_block_heights(&store), vec![4, 5]);
        // The watch is consumed.
        assert!(sync.take_new_block_heights(&store).is_empty());
    }
}
