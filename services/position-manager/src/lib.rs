//! Position Manager Service
//!
//! Authoritative position state for every (venue, symbol) the process
//! has observed:
//! - Concurrent keyed store with per-key serialization
//! - Shared-memory projection readable by out-of-process consumers
//! - Symbol-level aggregation across venues
//! - PnL and risk metrics
//! - Periodic durable snapshots with startup recovery

pub mod shm;
pub mod snapshot;
pub mod store;

pub use shm::{SharedMemoryRegion, SlotRecord};
pub use snapshot::{SnapshotDocument, SnapshotMetrics};
pub use store::{PositionStore, StoreMetrics};
