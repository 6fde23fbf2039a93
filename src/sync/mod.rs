//! Snapshot persistence module
//!
//! Snapshot records and their ordering, the numbered snapshot store of one
//! monitored root, and the checkpoints that address positions inside it.

pub mod checkpoint;
pub mod snapshot;
pub mod store;

pub use checkpoint::{monitor_name, GlobalCheckpoint, MonitorCheckpoint};
pub use snapshot::{compare_paths, now_millis, RecordKind, SnapshotRecord};
pub use store::{SnapshotReader, SnapshotStore, SnapshotWriter, StoreSummary};
