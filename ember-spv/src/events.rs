//! Observer interfaces for non-core collaborators.
//!
//! Each callback the client exposes is a single-method trait; UI layers
//! implement whichever they care about. All methods take `&self` so
//! implementers choose their own interior mutability or dispatch.

/// Receives scan progress updates, throttled by the scanner.
pub trait ScanObserver: Send + Sync {
    /// `scanned` of `total` blocks done; `status` is a short human line.
    fn scan_progress(&self, scanned: u32, total: u32, status: &str);
}

/// Notified when a new block extends the chain tip.
pub trait BlockObserver: Send + Sync {
    /// A block at `height` was connected.
    fn on_new_block(&self, height: u32);
}

/// Notified when the chain reorganizes.
pub trait ReorgObserver: Send + Sync {
    /// The chain switched from `old_height` to `new_height`, diverging
    /// above `common_ancestor`.
    fn on_reorg(&self, old_height: u32, new_height: u32, common_ancestor: u32);
}

/// Generic dirty notification for persisted wallet state.
pub trait StateObserver: Send + Sync {
    /// Something observable changed; re-read what you display.
    fn on_state_changed(&self);
}
