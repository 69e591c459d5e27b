//! Synchronization state machines.

pub mod filters;
pub mod headers;

pub use filters::FilterSyncManager;
pub use headers::{HeaderSyncManager, HeadersOutcome};
