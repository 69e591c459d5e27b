//! The SPV client facade.
//!
//! Owns the peer manager, the header chain store and both sync managers,
//! and runs the single-threaded event loop: peers push `(peer, message)`
//! events into one channel, and every piece of state mutation happens
//! here, between awaits. Long-running operations (sync, block fetches,
//! broadcast verification) pump the same loop while they wait, so the
//! client never needs a second thread of control.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use embercore::block::Block;
use embercore::hashes::BlockHash;
use embercore::network::message::NetworkMessage;
use embercore::network::message_blockdata::Inventory;
use embercore::params::ChainParams;
use embercore::transaction::Transaction;

use crate::chain::HeaderChainStore;
use crate::client::broadcast::BroadcastManager;
use crate::client::config::ClientConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{NetworkError, Result, SpvError, SyncError, SyncResult, WalletError};
use crate::events::{BlockObserver, ReorgObserver};
use crate::network::{NetworkEvent, NetworkManager, PeerNetworkManager, PeerPurpose};
use crate::sync::{FilterSyncManager, HeaderSyncManager, HeadersOutcome};
use crate::types::{ChainTip, SpvStats, SyncPhase, SyncProgress};
use crate::wallet::ScanSource;

/// Delay between a block `inv` and the follow-up header pull.
const DEFERRED_HEADER_PULL: Duration = Duration::from_millis(200);

/// Cadence of the maintenance pass inside the event loop.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Poll slice used while waiting inside the event loop.
const PUMP_SLICE: Duration = Duration::from_millis(100);

/// How long a missing filter is awaited before a probe gives up.
const FILTER_WAIT: Duration = Duration::from_secs(5);

/// How long to wait for filter-request capacity before skipping.
const CAPACITY_WAIT: Duration = Duration::from_secs(3);

/// Pause between announcing a tx and probing the peer's mempool.
const BROADCAST_SETTLE: Duration = Duration::from_secs(3);

enum BlockRequest {
    Pending,
    Arrived(Box<Block>),
    NotFound,
}

/// The Ember SPV client.
pub struct SpvClient {
    config: ClientConfig,
    params: ChainParams,
    clock: Arc<dyn Clock>,
    network: PeerNetworkManager,
    events_rx: UnboundedReceiver<NetworkEvent>,
    chain: HeaderChainStore,
    header_sync: HeaderSyncManager,
    filter_sync: FilterSyncManager,
    broadcast: BroadcastManager,
    pending_blocks: HashMap<BlockHash, BlockRequest>,
    deferred_header_pull: Option<Instant>,
    phase: SyncPhase,
    last_error: Option<String>,
    last_maintenance: Instant,
    block_observers: Vec<Arc<dyn BlockObserver>>,
    reorg_observers: Vec<Arc<dyn ReorgObserver>>,
}

impl SpvClient {
    /// Create a client with the real system clock.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create a client with an injected clock (tests).
    pub async fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let params = config.network.params();
        let chain = HeaderChainStore::open(params.clone(), &config.data_dir).await?;
        let (network, events_rx) = PeerNetworkManager::new(&config, clock.clone());
        let now = clock.now();
        Ok(SpvClient {
            header_sync: HeaderSyncManager::new(clock.clone()),
            filter_sync: FilterSyncManager::new(),
            broadcast: BroadcastManager::new(clock.clone()),
            params,
            clock,
            network,
            events_rx,
            chain,
            config,
            pending_blocks: HashMap::new(),
            deferred_header_pull: None,
            phase: SyncPhase::Idle,
            last_error: None,
            last_maintenance: now,
            block_observers: Vec::new(),
            reorg_observers: Vec::new(),
        })
    }

    /// Register a new-block observer.
    pub fn add_block_observer(&mut self, observer: Arc<dyn BlockObserver>) {
        self.block_observers.push(observer);
    }

    /// Register a reorg observer.
    pub fn add_reorg_observer(&mut self, observer: Arc<dyn ReorgObserver>) {
        self.reorg_observers.push(observer);
    }

    /// The chain parameters in use.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// The local chain tip.
    pub fn chain_tip(&self) -> ChainTip {
        ChainTip {
            height: self.chain.height(),
            hash: self.chain.tip_hash(),
        }
    }

    /// Current sync phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// The most recent user-visible error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> SpvStats {
        SpvStats {
            peer_count: self.network.peer_count(),
            header_height: self.chain.height(),
            filter_header_height: self.filter_sync.filter_header_tip().unwrap_or(0),
            cached_filters: self.filter_sync.cached_filter_count(),
            pending_headers: self.chain.pending_count(),
        }
    }

    /// Overall sync progress.
    pub fn sync_progress(&self) -> SyncProgress {
        SyncProgress {
            header_height: self.chain.height(),
            target_height: self.header_sync.target_height(),
            filter_header_height: self.filter_sync.filter_header_tip().unwrap_or(0),
            headers_synced: self.header_sync.is_synced(&self.chain),
            filter_headers_synced: self.filter_sync.headers_synced(&self.chain),
        }
    }

    /// Direct access to the header store (reads).
    pub fn chain(&self) -> &HeaderChainStore {
        &self.chain
    }

    /// Connect to the configured seed peers and wait for a handshake.
    pub async fn connect(&mut self) -> Result<()> {
        self.network.start();
        self.network.maintenance().await;
        let deadline = self.config.connect_timeout + self.config.handshake_timeout;
        let connected = self.pump_until(deadline, |c| c.network.has_active_peer()).await;
        if !connected {
            return Err(NetworkError::Timeout.into());
        }
        Ok(())
    }

    /// Run the full sync pipeline: headers, then filter checkpoints,
    /// then the filter header chain.
    pub async fn sync_to_tip(&mut self) -> Result<SyncProgress> {
        self.sync_headers().await?;
        self.sync_filters().await?;
        self.phase = SyncPhase::Ready;
        Ok(self.sync_progress())
    }

    /// Sync block headers to the best announced height. Times out after
    /// the configured window with one retry.
    pub async fn sync_headers(&mut self) -> Result<()> {
        self.phase = SyncPhase::Headers;
        self.last_error = None;

        let started = self.begin_header_sync().await?;
        if !started {
            return Ok(());
        }

        let mut retried = false;
        loop {
            let timeout = self.config.header_sync_timeout;
            let completed = self.pump_until(timeout, |c| !c.header_sync.is_syncing()).await;
            if completed {
                break;
            }
            if retried {
                self.last_error = Some("header sync timed out".to_string());
                return Err(SyncError::SyncTimeout.into());
            }
            retried = true;
            tracing::warn!("Header sync timed out, retrying once");
            self.header_sync
                .request_headers(&mut self.network, &mut self.chain, true)
                .await?;
        }

        if let Some(error) = self.last_error.clone() {
            return Err(SpvError::Sync(SyncError::SyncFailed(error)));
        }
        Ok(())
    }

    async fn begin_header_sync(&mut self) -> Result<bool> {
        Ok(self.header_sync.begin_sync(&mut self.network, &mut self.chain).await?)
    }

    /// Sync the filter checkpoint and filter-header chains.
    pub async fn sync_filters(&mut self) -> Result<()> {
        // Checkpoints first; they validate the header batches later.
        self.phase = SyncPhase::FilterCheckpoints;
        let requested =
            self.filter_sync.request_checkpoints(&mut self.network, &mut self.chain).await?;
        if requested {
            self.pump_until(FILTER_WAIT, |c| c.filter_sync.checkpoints_received()).await;
        }

        self.phase = SyncPhase::FilterHeaders;
        let started =
            self.filter_sync.begin_header_sync(&mut self.network, &mut self.chain).await?;
        if !started {
            return Ok(());
        }

        let mut retried = false;
        loop {
            let timeout = self.config.filter_header_sync_timeout;
            let completed =
                self.pump_until(timeout, |c| !c.filter_sync.is_syncing_headers()).await;
            if completed {
                return Ok(());
            }
            if retried {
                self.last_error = Some("filter header sync timed out".to_string());
                return Err(SyncError::SyncTimeout.into());
            }
            retried = true;
            tracing::warn!("Filter header sync timed out, retrying once");
            self.filter_sync.retry_current_batch(&mut self.network, &mut self.chain).await?;
        }
    }

    /// Fetch a block by hash. Resolves to `None` on timeout or when the
    /// peer answers `notfound`.
    pub async fn request_block(&mut self, hash: BlockHash) -> Result<Option<Block>> {
        let peer = self
            .network
            .select_peer(PeerPurpose::Data)
            .ok_or(NetworkError::NoPeerAvailable("data"))?;
        self.pending_blocks.insert(hash, BlockRequest::Pending);
        self.network
            .send(peer, NetworkMessage::GetData(vec![Inventory::Block(hash)]))
            .await
            .map_err(SpvError::Network)?;

        self.pump_until(self.config.block_request_timeout, |c| {
            !matches!(c.pending_blocks.get(&hash), Some(BlockRequest::Pending))
        })
        .await;

        match self.pending_blocks.remove(&hash) {
            Some(BlockRequest::Arrived(block)) => Ok(Some(*block)),
            _ => {
                tracing::warn!("Block {} was not delivered", hash);
                Ok(None)
            }
        }
    }

    /// Fetch the block at a height.
    pub async fn request_block_at(&mut self, height: u32) -> Result<Option<Block>> {
        let Some(hash) = self.chain.get_block_hash_async(height).await? else {
            return Ok(None);
        };
        self.request_block(hash).await
    }

    /// Kick off filter requests for a height range, waiting briefly for
    /// in-flight capacity and skipping the remainder if none frees up.
    pub async fn prefetch_filter_range(&mut self, start: u32, end: u32) -> Result<()> {
        let began = self.clock.now();
        let mut cursor = start;
        while cursor <= end.min(self.chain.height()) {
            let requested = self
                .filter_sync
                .request_filter_batch(cursor, end, &mut self.network, &mut self.chain)
                .await?;
            if requested > 0 {
                cursor += requested;
                continue;
            }
            if self.clock.now().saturating_duration_since(began) >= CAPACITY_WAIT {
                tracing::warn!(
                    "Filter prefetch capacity exhausted; skipping heights {}..={}",
                    cursor,
                    end
                );
                break;
            }
            self.pump_until(PUMP_SLICE, |c| c.filter_sync.has_capacity()).await;
        }
        Ok(())
    }

    /// Whether the filter at `height` matches any of the scripts,
    /// fetching the filter on demand.
    pub async fn filter_matches(
        &mut self,
        height: u32,
        scripts: &[Vec<u8>],
    ) -> Result<bool> {
        if !self.filter_sync.has_filter(height) {
            let began = self.clock.now();
            loop {
                let sent = self
                    .filter_sync
                    .request_filter(height, &mut self.network, &mut self.chain)
                    .await?;
                if sent {
                    break;
                }
                if self.clock.now().saturating_duration_since(began) >= CAPACITY_WAIT {
                    tracing::warn!("No filter-request capacity for height {}", height);
                    break;
                }
                self.pump_until(PUMP_SLICE, |c| c.filter_sync.has_capacity()).await;
            }
            self.pump_until(FILTER_WAIT, |c| c.filter_sync.has_filter(height)).await;
        }
        if !self.filter_sync.has_filter(height) {
            return Err(SyncError::SyncFailed(format!(
                "filter for height {} unavailable",
                height
            ))
            .into());
        }

        let block_hash = self
            .chain
            .get_block_hash_async(height)
            .await?
            .ok_or_else(|| SyncError::InvalidState(format!("no header at height {}", height)))?;
        Ok(self.filter_sync.matches_scripts(height, &block_hash, scripts)?)
    }

    /// Broadcast a signed transaction and verify mempool acceptance.
    ///
    /// `fee_rate` (sats/vB) gates announcement against peers' `feefilter`
    /// floors (which arrive in sats/kvB).
    pub async fn broadcast_transaction(
        &mut self,
        tx: &Transaction,
        fee_rate: u64,
    ) -> Result<crate::types::BroadcastResult> {
        let txid = self.broadcast.insert(tx.clone());
        self.broadcast.reset_inv_sightings();

        let inv = NetworkMessage::Inv(vec![Inventory::Transaction(txid)]);
        let mut announced_to = 0usize;
        let peers: Vec<_> =
            self.network.peer_infos().into_iter().filter(|p| p.handshake_complete).collect();
        for peer in &peers {
            if let Some(floor) = self.network.peer_fee_floor(&peer.address) {
                if floor > 0 && (fee_rate as i64).saturating_mul(1000) < floor {
                    tracing::debug!(
                        "Skipping inv to {}: fee floor {} above our rate",
                        peer.address,
                        floor
                    );
                    continue;
                }
            }
            if self.network.send(peer.address, inv.clone()).await.is_ok() {
                announced_to += 1;
            }
        }
        if announced_to == 0 {
            return Err(WalletError::BroadcastFailed("no peers to announce to".into()).into());
        }
        tracing::info!("Announced transaction {} to {} peer(s)", txid, announced_to);

        // Serve getdata pulls, then probe one peer's mempool.
        self.pump_for(BROADCAST_SETTLE).await;

        if let Some(peer) = self.network.select_peer(PeerPurpose::Data) {
            if let Err(e) = self.network.send(peer, NetworkMessage::MemPool).await {
                tracing::warn!("Mempool probe failed: {}", e);
            }
        }
        let seen = self
            .pump_until(self.config.mempool_verify_timeout, |c| {
                c.broadcast.seen_in_mempool(&txid)
            })
            .await;

        if seen {
            tracing::info!("Transaction {} observed in a peer mempool", txid);
        } else {
            tracing::warn!("Transaction {} not (yet) observed in a peer mempool", txid);
        }

        Ok(crate::types::BroadcastResult {
            txid: txid.to_string(),
            announced_to,
            requested_by: self.broadcast.getdata_count(&txid),
            seen_in_mempool: seen,
        })
    }

    /// Handle a reorg: truncate headers and filter state back to the
    /// common ancestor and notify observers. The wallet flips its own
    /// UTXOs via `WalletManager::handle_reorg`.
    pub async fn handle_reorg(&mut self, common_ancestor: u32) -> Result<()> {
        let old_height = self.chain.height();
        if common_ancestor >= old_height {
            return Ok(());
        }
        self.chain.truncate(common_ancestor).await?;
        self.filter_sync.truncate_above(common_ancestor);
        let new_height = self.chain.height();
        tracing::warn!(
            "Reorg handled: {} -> {} (ancestor {})",
            old_height,
            new_height,
            common_ancestor
        );
        for observer in &self.reorg_observers {
            observer.on_reorg(old_height, new_height, common_ancestor);
        }
        Ok(())
    }

    /// Process buffered events for at most `duration`.
    pub async fn pump_for(&mut self, duration: Duration) {
        self.pump_until(duration, |_| false).await;
    }

    /// Process events until `condition` holds or `timeout` elapses.
    /// Returns whether the condition was met.
    async fn pump_until(
        &mut self,
        timeout: Duration,
        condition: impl Fn(&Self) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            self.run_maintenance().await;

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return condition(self);
            }
            let slice = (deadline - now).min(PUMP_SLICE);
            match tokio::time::timeout(slice, self.events_rx.recv()).await {
                Ok(Some(event)) => self.dispatch(event).await,
                Ok(None) => return condition(self),
                Err(_) => {}
            }
        }
    }

    async fn run_maintenance(&mut self) {
        let now = self.clock.now();

        if let Some(due) = self.deferred_header_pull {
            if now >= due {
                self.deferred_header_pull = None;
                if let Err(e) = self
                    .header_sync
                    .request_headers(&mut self.network, &mut self.chain, true)
                    .await
                {
                    tracing::debug!("Deferred header pull failed: {}", e);
                }
            }
        }

        if now.saturating_duration_since(self.last_maintenance) >= MAINTENANCE_INTERVAL {
            self.last_maintenance = now;
            self.network.maintenance().await;
            self.broadcast.purge_expired();
        }
    }

    /// Route one event from the peer layer.
    async fn dispatch(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Disconnected(address) => {
                self.network.handle_disconnect(address);
            }
            NetworkEvent::Message(address, message) => {
                let was_version = matches!(message, NetworkMessage::Version(_));
                match self.network.handle_message(address, &message).await {
                    Ok(true) => {
                        if was_version {
                            if let Some(height) = self.network.best_peer_height() {
                                self.header_sync.observe_peer_height(height);
                            }
                        }
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Peer control message from {} failed: {}", address, e);
                        return;
                    }
                }
                self.dispatch_protocol_message(address, message).await;
            }
        }
    }

    async fn dispatch_protocol_message(
        &mut self,
        address: std::net::SocketAddr,
        message: NetworkMessage,
    ) {
        match message {
            NetworkMessage::Headers(headers) => {
                match self
                    .header_sync
                    .handle_headers(headers, &mut self.network, &mut self.chain)
                    .await
                {
                    Ok(HeadersOutcome::Stalled) => {
                        self.last_error = Some("chain sync stalled".to_string());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Headers processing failed: {}", e);
                        self.last_error = Some(e.to_string());
                    }
                }
                for height in self.header_sync.take_new_block_heights(&self.chain) {
                    tracing::info!("New block at height {}", height);
                    for observer in &self.block_observers {
                        observer.on_new_block(height);
                    }
                }
            }
            NetworkMessage::Inv(items) => {
                self.broadcast.note_tx_invs(items.iter());
                let has_new_block = items.iter().any(|item| match item {
                    Inventory::Block(hash) => self.chain.height_of(hash).is_none(),
                    _ => false,
                });
                if has_new_block {
                    self.header_sync.note_block_inv(&self.chain);
                    self.deferred_header_pull = Some(self.clock.now() + DEFERRED_HEADER_PULL);
                    tracing::debug!("Block inv received; header pull scheduled");
                }
            }
            NetworkMessage::GetData(items) => {
                for item in &items {
                    if let Some(tx) = self.broadcast.lookup_getdata(item) {
                        tracing::info!("Serving tx {} to {}", tx.txid(), address);
                        if let Err(e) =
                            self.network.send(address, NetworkMessage::Tx(tx)).await
                        {
                            tracing::warn!("Failed to serve tx: {}", e);
                        }
                    }
                }
            }
            NetworkMessage::NotFound(items) => {
                for item in items {
                    match item {
                        Inventory::Block(hash) => {
                            tracing::warn!("Peer has no block {}", hash);
                            if let Some(entry) = self.pending_blocks.get_mut(&hash) {
                                *entry = BlockRequest::NotFound;
                            }
                        }
                        other => {
                            tracing::debug!("notfound for {:?}", other);
                        }
                    }
                }
            }
            NetworkMessage::Block(block) => {
                let hash = block.block_hash(&self.params);
                match self.pending_blocks.get_mut(&hash) {
                    Some(entry) => *entry = BlockRequest::Arrived(Box::new(block)),
                    None => tracing::debug!("Unsolicited block {}", hash),
                }
            }
            NetworkMessage::Tx(tx) => {
                tracing::debug!("Ignoring unsolicited tx {}", tx.txid());
            }
            NetworkMessage::CFCheckpt(msg) => {
                self.filter_sync.handle_cfcheckpt(msg, &self.chain);
            }
            NetworkMessage::CFHeaders(msg) => {
                if let Err(e) = self
                    .filter_sync
                    .handle_cfheaders(msg, &mut self.network, &mut self.chain)
                    .await
                {
                    tracing::warn!("cfheaders processing failed: {}", e);
                }
            }
            NetworkMessage::CFilter(msg) => {
                self.filter_sync.handle_cfilter(msg);
            }
            NetworkMessage::Reject(reject) => {
                tracing::warn!(
                    "Peer {} rejected our '{}': {} ({})",
                    address,
                    reject.message,
                    reject.reason.name(),
                    reject.detail
                );
            }
            other => {
                tracing::debug!("Ignoring '{}' from {}", other.cmd(), address);
            }
        }
    }
}

#[async_trait]
impl ScanSource for SpvClient {
    fn tip_height(&self) -> u32 {
        self.chain.height()
    }

    async fn prefetch_filters(&mut self, start: u32, end: u32) -> SyncResult<()> {
        self.prefetch_filter_range(start, end)
            .await
            .map_err(|e| SyncError::SyncFailed(e.to_string()))
    }

    async fn filter_matches_scripts(
        &mut self,
        height: u32,
        scripts: &[Vec<u8>],
    ) -> SyncResult<bool> {
        self.filter_matches(height, scripts)
            .await
            .map_err(|e| SyncError::SyncFailed(e.to_string()))
    }

    async fn fetch_block(&mut self, height: u32) -> SyncResult<Option<Block>> {
        self.request_block_at(height)
            .await
            .map_err(|e| SyncError::SyncFailed(e.to_string()))
    }
}
