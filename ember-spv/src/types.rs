//! Shared client types.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use embercore::hashes::BlockHash;
use embercore::network::ServiceFlags;

/// The phases of initial sync, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncPhase {
    /// Not yet connected to any peer.
    Idle,
    /// Downloading block headers.
    Headers,
    /// Fetching filter-header checkpoints.
    FilterCheckpoints,
    /// Downloading the filter header chain.
    FilterHeaders,
    /// Caught up; following the tip.
    Ready,
}

/// A snapshot of overall sync progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncProgress {
    /// Local header tip height.
    pub header_height: u32,
    /// Best height announced by any peer.
    pub target_height: u32,
    /// Filter-header chain height.
    pub filter_header_height: u32,
    /// Whether header sync has reached the target.
    pub headers_synced: bool,
    /// Whether the filter header chain has reached the header tip.
    pub filter_headers_synced: bool,
}

/// Information about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The peer's socket address.
    pub address: SocketAddr,
    /// Whether the handshake completed.
    pub handshake_complete: bool,
    /// Whether this peer came from the seed list.
    pub is_seed: bool,
    /// Services the peer advertised.
    pub services: ServiceFlags,
    /// Whether the peer can serve compact filters.
    pub supports_filters: bool,
    /// Best height the peer announced in its `version`.
    pub start_height: u32,
    /// Smoothed ping round-trip time, if measured.
    pub ping_rtt: Option<Duration>,
}

/// A filter match for one block during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterMatch {
    /// The matched height.
    pub height: u32,
    /// The hash of the block at that height.
    pub block_hash: BlockHash,
}

/// The local chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    /// Tip height; 0 means only genesis is known.
    pub height: u32,
    /// Tip block hash (the genesis hash at height 0).
    pub hash: BlockHash,
}

/// Outcome of a transaction broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    /// Display txid of the broadcast transaction.
    pub txid: String,
    /// How many peers the announcement went to.
    pub announced_to: usize,
    /// How many peers requested the transaction body.
    pub requested_by: usize,
    /// Whether the transaction showed up in a peer's mempool
    /// announcement during verification. Best effort.
    pub seen_in_mempool: bool,
}

/// Aggregate client statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpvStats {
    /// Connected peers.
    pub peer_count: usize,
    /// Local header tip.
    pub header_height: u32,
    /// Filter-header chain height.
    pub filter_header_height: u32,
    /// Decoded filters currently cached.
    pub cached_filters: usize,
    /// Headers waiting to be flushed to disk.
    pub pending_headers: usize,
}
