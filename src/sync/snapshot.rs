//! Snapshot records and their ordering
//!
//! A snapshot is the full, sorted list of what one pass saw. Records sort
//! by path with one twist: a directory compares as if its path ended in
//! the separator, and the separator sorts below every other byte. That
//! makes the sorted order identical to a depth-first walk that visits
//! each directory right before its own children:
//!
//! ```text
//! foo/        (directory)
//! foo/x
//! foo-bar
//! foo.bar
//! ```

use crate::fs::access::SEPARATOR;
use crate::fs::acl::Acl;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordKind {
    File,
    Dir,
}

impl RecordKind {
    /// Kind of an entry given its directory flag
    pub fn from_is_dir(is_dir: bool) -> Self {
        if is_dir {
            Self::Dir
        } else {
            Self::File
        }
    }
}

/// One persisted fact about one path as of one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Transport name (e.g. `local`)
    pub file_system_type: String,
    /// Full path
    pub path: String,
    /// File or directory
    pub kind: RecordKind,
    /// Modification time in ms since the epoch; always 0 for directories
    pub last_modified: i64,
    /// Aggregated access list
    pub acl: Acl,
    /// Content checksum; empty for directories
    pub checksum: String,
    /// When this record was first written, ms since the epoch
    pub scan_time: i64,
    /// Whether the checksum has been observed unchanged for the stability interval
    pub stable: bool,
}

impl SnapshotRecord {
    /// Fresh, unstable file record
    pub fn file(
        file_system_type: impl Into<String>,
        path: impl Into<String>,
        last_modified: i64,
        acl: Acl,
        checksum: impl Into<String>,
        scan_time: i64,
    ) -> Self {
        Self {
            file_system_type: file_system_type.into(),
            path: path.into(),
            kind: RecordKind::File,
            last_modified,
            acl,
            checksum: checksum.into(),
            scan_time,
            stable: false,
        }
    }

    /// Fresh directory record
    pub fn directory(
        file_system_type: impl Into<String>,
        path: impl Into<String>,
        acl: Acl,
        scan_time: i64,
    ) -> Self {
        Self {
            file_system_type: file_system_type.into(),
            path: path.into(),
            kind: RecordKind::Dir,
            last_modified: 0,
            acl,
            checksum: String::new(),
            scan_time,
            stable: false,
        }
    }

    /// Is this a directory record
    pub fn is_directory(&self) -> bool {
        self.kind == RecordKind::Dir
    }

    /// Snapshot order between two records
    pub fn compare(&self, other: &SnapshotRecord) -> Ordering {
        compare_paths(&self.path, self.is_directory(), &other.path, other.is_directory())
    }

    /// Whether this record is due to become stable at `now`
    pub fn stability_due(&self, now: i64, stability_interval_ms: i64) -> bool {
        !self.stable && now.saturating_sub(self.scan_time) >= stability_interval_ms
    }
}

/// Ordering key bytes: the directory separator maps to 0 and directories
/// carry a trailing separator.
fn key_bytes(path: &str, is_dir: bool) -> impl Iterator<Item = u8> + '_ {
    path.bytes()
        .chain(is_dir.then_some(SEPARATOR as u8))
        .map(|b| if b == SEPARATOR as u8 { 0 } else { b })
}

/// Compare two entries in snapshot order
pub fn compare_paths(a: &str, a_is_dir: bool, b: &str, b_is_dir: bool) -> Ordering {
    key_bytes(a, a_is_dir).cmp(key_bytes(b, b_is_dir))
}

/// Current time in ms since the epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
