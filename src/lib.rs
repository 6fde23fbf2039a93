//! # SnapWatch
//!
//! Poll-based change feed for directory trees.
//!
//! SnapWatch keeps a durable, ordered snapshot of every monitored root and
//! diffs the live tree against it on each pass. Every difference becomes a
//! change event tagged with a checkpoint, so a consumer that acknowledges
//! what it has processed can crash, restart and pick up exactly where it
//! left off.
//!
//! ## Features
//!
//! - **Ordered snapshots**: records stored in traversal order, merged
//!   against the live listing in a single pass
//! - **Stable checksums**: files untouched for the stability interval are
//!   not re-read
//! - **Crash recovery**: partial snapshots are stitched back together at
//!   the last acknowledged checkpoint
//! - **Access lists**: file and share ACEs merged under a security policy
//! - **Filtering**: glob include/exclude patterns, size and MIME limits
//! - **Checksums**: XXHash3, XXHash64, BLAKE3, SHA-256
//!
//! ## Quick Start
//!
//! ```no_run
//! use snapwatch::prelude::*;
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! let config = MonitorConfig {
//!     roots: vec![PathBuf::from("/data/docs")],
//!     ..Default::default()
//! };
//! let mut manager = MonitorManager::new(config).unwrap();
//! manager.start(None).unwrap();
//!
//! let queue = manager.queue();
//! let batch = queue.next_batch(100, Duration::from_secs(1));
//! for change in &batch {
//!     println!("{:?} {}", change.change.kind, change.change.subject.path);
//! }
//! if let Some(last) = batch.last() {
//!     queue.acknowledge(last.global).unwrap();
//! }
//! manager.stop();
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod hash;
pub mod sync;

// Re-export commonly used types
pub use config::{HashAlgorithm, MonitorConfig, SecurityPolicy};
pub use core::{Change, ChangeKind, ChangeQueue, MonitorManager};
pub use error::{Result, SnapWatchError};
pub use sync::{GlobalCheckpoint, MonitorCheckpoint};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use snapwatch::prelude::*;
    //! ```

    pub use crate::config::{HashAlgorithm, MonitorConfig, SecurityPolicy};
    pub use crate::core::{
        Change, ChangeKind, ChangeQueue, Monitor, MonitorCallback, MonitorManager, QueuedChange,
    };
    pub use crate::error::{Result, SnapWatchError};
    pub use crate::fs::{Acl, FileInfo, FileSystemType, LocalFileSystem, PatternFilter};
    pub use crate::hash::ChecksumGenerator;
    pub use crate::sync::{GlobalCheckpoint, MonitorCheckpoint, SnapshotRecord, SnapshotStore};
}
