//! BIP157 filter synchronization.
//!
//! Three layers of state: checkpoint headers every 1000 blocks, the
//! filter header chain, and a cache of decoded filters. Filter requests
//! are bounded; callers back off when the in-flight window is full.

use std::collections::{BTreeMap, HashMap};

use embercore::bip158::{filter_header, BlockFilter};
use embercore::hashes::{BlockHash, FilterHash, FilterHeader};
use embercore::network::message::NetworkMessage;
use embercore::network::message_filter::{
    CFCheckpt, CFHeaders, CFilter, GetCFCheckpt, GetCFHeaders, GetCFilters, FILTER_TYPE_BASIC,
};

use crate::chain::HeaderChainStore;
use crate::error::{SyncError, SyncResult};
use crate::network::{NetworkManager, PeerPurpose};

/// Maximum in-flight filter requests.
pub const FILTER_BATCH_SIZE: usize = 100;

/// BIP157 checkpoint spacing.
pub const CHECKPOINT_INTERVAL: u32 = 1000;

/// Filter headers per `getcfheaders` batch. Peers cap responses at 2000;
/// staying just under avoids the edge.
const CFHEADER_BATCH_SIZE: u32 = 1999;

/// One link of the filter header chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterHeaderEntry {
    /// The chained filter header at this height.
    pub header: FilterHeader,
    /// The filter hash this entry commits to.
    pub filter_hash: FilterHash,
}

/// Manages BIP157 filter synchronization.
pub struct FilterSyncManager {
    filter_headers: BTreeMap<u32, FilterHeaderEntry>,
    checkpoints: BTreeMap<u32, FilterHeader>,
    filters: HashMap<u32, BlockFilter>,
    pending_requests: BTreeMap<u32, BlockHash>,
    pending_by_hash: HashMap<BlockHash, u32>,
    syncing_headers: bool,
    next_batch_start: u32,
    checkpoints_received: bool,
}

impl FilterSyncManager {
    /// Create a new filter sync manager.
    pub fn new() -> Self {
        FilterSyncManager {
            filter_headers: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            filters: HashMap::new(),
            pending_requests: BTreeMap::new(),
            pending_by_hash: HashMap::new(),
            syncing_headers: false,
            next_batch_start: 1,
            checkpoints_received: false,
        }
    }

    /// Height of the filter header chain tip, if any.
    pub fn filter_header_tip(&self) -> Option<u32> {
        self.filter_headers.keys().next_back().copied()
    }

    /// The filter header at a height.
    pub fn filter_header_at(&self, height: u32) -> Option<FilterHeader> {
        self.filter_headers.get(&height).map(|e| e.header)
    }

    /// Whether the filter header chain reaches the block header tip.
    pub fn headers_synced(&self, store: &HeaderChainStore) -> bool {
        store.height() > 0 && self.filter_header_tip() >= Some(store.height())
    }

    /// Whether filter-header sync is in flight.
    pub fn is_syncing_headers(&self) -> bool {
        self.syncing_headers
    }

    /// Number of decoded filters in the cache.
    pub fn cached_filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Request the checkpoint chain. The stop hash is the header one
    /// below the tip.
    pub async fn request_checkpoints(
        &mut self,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<bool> {
        let tip = store.height();
        if tip < 2 {
            return Ok(false);
        }
        let stop_hash = store
            .get_block_hash_async(tip - 1)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?
            .ok_or_else(|| SyncError::InvalidState("missing header below tip".to_string()))?;

        let peer = network
            .select_peer(PeerPurpose::Filters)
            .ok_or(SyncError::Network("no filter-capable peer".to_string()))?;
        network
            .send(
                peer,
                NetworkMessage::GetCFCheckpt(GetCFCheckpt {
                    filter_type: FILTER_TYPE_BASIC,
                    stop_hash,
                }),
            )
            .await
            .map_err(|e| SyncError::Network(format!("Failed to send getcfcheckpt: {}", e)))?;
        tracing::debug!("Requested filter checkpoints up to {}", stop_hash);
        Ok(true)
    }

    /// Store a checkpoint response. Entry `i` covers height
    /// `min((i+1)*1000 - 1, stop_height)`.
    pub fn handle_cfcheckpt(&mut self, msg: CFCheckpt, store: &HeaderChainStore) {
        let Some(stop_height) = store.height_of(&msg.stop_hash) else {
            tracing::warn!("cfcheckpt stop hash {} is not on our chain", msg.stop_hash);
            return;
        };
        for (i, header) in msg.filter_headers.iter().enumerate() {
            let height = ((i as u32 + 1) * CHECKPOINT_INTERVAL - 1).min(stop_height);
            self.checkpoints.insert(height, *header);
        }
        self.checkpoints_received = true;
        tracing::info!("Stored {} filter checkpoints", msg.filter_headers.len());
    }

    /// Whether a `cfcheckpt` response has arrived this session.
    pub fn checkpoints_received(&self) -> bool {
        self.checkpoints_received
    }

    /// Re-send the current filter-header batch after a timeout.
    pub async fn retry_current_batch(
        &mut self,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<()> {
        if self.syncing_headers {
            let start = self.next_batch_start;
            self.request_header_batch(network, store, start).await?;
        }
        Ok(())
    }

    /// Start filter-header sync from the last known header.
    pub async fn begin_header_sync(
        &mut self,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<bool> {
        if self.syncing_headers {
            return Err(SyncError::SyncInProgress);
        }
        let tip = store.height();
        let start = self.filter_header_tip().map(|h| h + 1).unwrap_or(1);
        if tip == 0 || start > tip {
            tracing::info!("Filter headers already at the header tip");
            return Ok(false);
        }
        self.syncing_headers = true;
        self.request_header_batch(network, store, start).await?;
        Ok(true)
    }

    async fn request_header_batch(
        &mut self,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
        start: u32,
    ) -> SyncResult<()> {
        let tip = store.height();
        let end = (start + CFHEADER_BATCH_SIZE - 1).min(tip);
        let stop_hash = store
            .get_block_hash_async(end)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?
            .ok_or_else(|| SyncError::InvalidState("missing batch stop header".to_string()))?;

        let peer = network
            .select_peer(PeerPurpose::Filters)
            .ok_or(SyncError::Network("no filter-capable peer".to_string()))?;
        network
            .send(
                peer,
                NetworkMessage::GetCFHeaders(GetCFHeaders {
                    filter_type: FILTER_TYPE_BASIC,
                    start_height: start,
                    stop_hash,
                }),
            )
            .await
            .map_err(|e| SyncError::Network(format!("Failed to send getcfheaders: {}", e)))?;

        self.next_batch_start = start;
        tracing::debug!("Requested filter headers {}..={}", start, end);
        Ok(())
    }

    /// Process a `cfheaders` batch. Returns true when the chain reached
    /// the header tip and sync is complete.
    pub async fn handle_cfheaders(
        &mut self,
        msg: CFHeaders,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<bool> {
        if msg.filter_hashes.is_empty() {
            self.syncing_headers = false;
            return Ok(true);
        }

        let start = self.next_batch_start;
        // Seed from our own chain when we have it; a fresh chain trusts
        // the payload's previous header.
        let mut prev = match start.checked_sub(1).and_then(|h| self.filter_header_at(h)) {
            Some(header) => header,
            None => msg.previous_filter_header,
        };

        let mut height = start;
        for filter_hash in &msg.filter_hashes {
            let header = filter_header(filter_hash, &prev);
            self.filter_headers.insert(
                height,
                FilterHeaderEntry {
                    header,
                    filter_hash: *filter_hash,
                },
            );
            prev = header;
            height += 1;
        }
        let end = height - 1;

        self.validate_checkpoints(start, end);

        tracing::info!(
            "Filter header chain extended to height {} ({} entries)",
            end,
            msg.filter_hashes.len()
        );

        if self.syncing_headers && end < store.height() {
            self.request_header_batch(network, store, end + 1).await?;
            return Ok(false);
        }
        self.syncing_headers = false;
        Ok(true)
    }

    /// Compare the chain against any checkpoints in `[start, end]`.
    /// Mismatches are logged loudly but do not abort sync.
    fn validate_checkpoints(&self, start: u32, end: u32) {
        for (&height, expected) in self.checkpoints.range(start..=end) {
            match self.filter_header_at(height) {
                Some(actual) if actual == *expected => {
                    tracing::debug!("Filter checkpoint at height {} validated", height);
                }
                Some(actual) => {
                    tracing::warn!(
                        "Filter checkpoint mismatch at height {}: expected {}, built {}",
                        height,
                        expected,
                        actual
                    );
                }
                None => {}
            }
        }
    }

    /// Whether another filter request fits in the in-flight window.
    pub fn has_capacity(&self) -> bool {
        self.pending_requests.len() < FILTER_BATCH_SIZE
    }

    /// Whether the filter for a height is cached.
    pub fn has_filter(&self, height: u32) -> bool {
        self.filters.contains_key(&height)
    }

    /// The cached filter for a height.
    pub fn filter(&self, height: u32) -> Option<&BlockFilter> {
        self.filters.get(&height)
    }

    /// Request a single filter. Returns false when the in-flight window
    /// is full; the caller retries after draining responses.
    pub async fn request_filter(
        &mut self,
        height: u32,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<bool> {
        if self.has_filter(height) || self.pending_requests.contains_key(&height) {
            return Ok(true);
        }
        if !self.has_capacity() {
            return Ok(false);
        }
        self.request_filter_range(height, height, network, store).await?;
        Ok(true)
    }

    /// Request filters for a height range, clamped to the remaining
    /// in-flight capacity. Returns the number of heights requested.
    pub async fn request_filter_batch(
        &mut self,
        start: u32,
        end: u32,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<u32> {
        let capacity = FILTER_BATCH_SIZE - self.pending_requests.len();
        if capacity == 0 {
            return Ok(0);
        }
        let end = end.min(store.height()).min(start + capacity as u32 - 1);
        if start > end {
            return Ok(0);
        }
        self.request_filter_range(start, end, network, store).await?;
        Ok(end - start + 1)
    }

    async fn request_filter_range(
        &mut self,
        start: u32,
        end: u32,
        network: &mut dyn NetworkManager,
        store: &mut HeaderChainStore,
    ) -> SyncResult<()> {
        let stop_hash = store
            .get_block_hash_async(end)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?
            .ok_or_else(|| SyncError::InvalidState("missing filter stop header".to_string()))?;

        for height in start..=end {
            let hash = store
                .get_block_hash_async(height)
                .await
                .map_err(|e| SyncError::Storage(e.to_string()))?
                .ok_or_else(|| SyncError::InvalidState("missing header in range".to_string()))?;
            self.pending_requests.insert(height, hash);
            self.pending_by_hash.insert(hash, height);
        }

        let peer = network
            .select_peer(PeerPurpose::Filters)
            .ok_or(SyncError::Network("no filter-capable peer".to_string()))?;
        network
            .send(
                peer,
                NetworkMessage::GetCFilters(GetCFilters {
                    filter_type: FILTER_TYPE_BASIC,
                    start_height: start,
                    stop_hash,
                }),
            )
            .await
            .map_err(|e| SyncError::Network(format!("Failed to send getcfilters: {}", e)))?;
        tracing::debug!("Requested filters {}..={}", start, end);
        Ok(())
    }

    /// Store an incoming filter, resolving it against the pending map by
    /// block hash with an oldest-request fallback.
    pub fn handle_cfilter(&mut self, msg: CFilter) {
        let height = match self.pending_by_hash.remove(&msg.block_hash) {
            Some(height) => {
                self.pending_requests.remove(&height);
                height
            }
            None => {
                // Fallback: treat it as the answer to our oldest request.
                let Some((&height, &hash)) = self.pending_requests.iter().next() else {
                    tracing::warn!(
                        "Unsolicited cfilter for block {}, dropping",
                        msg.block_hash
                    );
                    return;
                };
                tracing::warn!(
                    "cfilter block hash {} not pending; assuming height {}",
                    msg.block_hash,
                    height
                );
                self.pending_requests.remove(&height);
                self.pending_by_hash.remove(&hash);
                height
            }
        };
        self.filters.insert(height, BlockFilter::new(msg.filter));
    }

    /// Probabilistic membership test of `scripts` against the cached
    /// filter at `height`. The caller supplies the block hash that keys
    /// the filter's SipHash.
    pub fn matches_scripts(
        &self,
        height: u32,
        block_hash: &BlockHash,
        scripts: &[Vec<u8>],
    ) -> SyncResult<bool> {
        let filter = self
            .filters
            .get(&height)
            .ok_or_else(|| SyncError::InvalidState(format!("no filter cached for {}", height)))?;
        filter
            .match_any(block_hash, scripts.iter().map(|s| s.as_slice()))
            .map_err(|e| SyncError::SyncFailed(format!("filter decode failed: {}", e)))
    }

    /// Drop all filter state above `height` after a reorg.
    pub fn truncate_above(&mut self, height: u32) {
        self.filter_headers.retain(|&h, _| h <= height);
        self.filters.retain(|&h, _| h <= height);
        let removed: Vec<(u32, BlockHash)> = self
            .pending_requests
            .range(height + 1..)
            .map(|(&h, &hash)| (h, hash))
            .collect();
        for (h, hash) in removed {
            self.pending_requests.remove(&h);
            self.pending_by_hash.remove(&hash);
        }
        self.checkpoints.retain(|&h, _| h <= height);
    }

    /// Forget everything, including cached filters.
    pub fn reset(&mut self) {
        self.filter_headers.clear();
        self.checkpoints.clear();
        self.filters.clear();
        self.pending_requests.clear();
        self.pending_by_hash.clear();
        self.syncing_headers = false;
        self.next_batch_start = 1;
        self.checkpoints_received = false;
    }
}

impl Default for FilterSyncManager {
    fn default() -> Self {
        Self::new()
    }
}
