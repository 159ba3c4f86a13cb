//! Domain module - accounts, snapshots and the bookkeeping types shared by
//! the fleet and the companion.
//!
//! Each module is its own file in the domain/ directory; commonly used
//! items are re-exported here.

pub mod account;
pub mod cycle_stats;
pub mod snapshot;
pub mod sync_state;

pub use account::Account;
pub use cycle_stats::{CycleStats, CycleSummary};
pub use snapshot::{FieldMap, FieldValue, IngestPayload, Snapshot, SnapshotKind};
pub use sync_state::{ConnectedAccount, DailySyncDecision, DailySyncState, SyncStatus, SyncTrigger};
