//! Change callbacks emitted by a monitor pass
//!
//! A pass reports each difference between the previous snapshot and the
//! live tree through [`MonitorCallback`], together with the checkpoint
//! that makes the change resumable. The change queue implements the trait
//! for delivery; [`FilteringCallback`] wraps any implementation to apply
//! the consumer's size and MIME limits.

use crate::error::Result;
use crate::fs::{Acl, ContentOracle, FileInfo, RejectReason, RejectionSink};
use crate::sync::{MonitorCheckpoint, SnapshotRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NewFile,
    NewDir,
    DeletedFile,
    DeletedDir,
    ChangedContent,
    ChangedDirMetadata,
}

impl ChangeKind {
    /// Is this a deletion
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeletedFile | Self::DeletedDir)
    }
}

/// The entry a change is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSubject {
    pub path: String,
    pub file_system_type: String,
    pub acl: Acl,
    pub last_modified: i64,
    /// Size in bytes; unknown for deletions and directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    pub is_dir: bool,
}

impl ChangeSubject {
    /// Subject described by a snapshot record
    pub fn from_record(record: &SnapshotRecord, length: Option<u64>) -> Self {
        Self {
            path: record.path.clone(),
            file_system_type: record.file_system_type.clone(),
            acl: record.acl.clone(),
            last_modified: record.last_modified,
            length,
            is_dir: record.is_directory(),
        }
    }
}

/// One change, tagged with the checkpoint that makes it resumable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub subject: ChangeSubject,
    pub checkpoint: MonitorCheckpoint,
}

impl Change {
    /// Create a change
    pub fn new(kind: ChangeKind, subject: ChangeSubject, checkpoint: MonitorCheckpoint) -> Self {
        Self {
            kind,
            subject,
            checkpoint,
        }
    }
}

/// Receives the differences found by a monitor pass.
///
/// Every method is called after the record it describes has been written
/// to the new snapshot, so the checkpoint is safe to resume from once the
/// change has been acknowledged.
pub trait MonitorCallback: Send + Sync {
    /// A pass is starting
    fn pass_begin(&self) -> Result<()>;

    /// A file appeared
    fn new_file(
        &self,
        file: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()>;

    /// A directory appeared
    fn new_directory(
        &self,
        dir: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()>;

    /// A file went away; `record` is its last known state
    fn deleted_file(&self, record: &SnapshotRecord, checkpoint: &MonitorCheckpoint) -> Result<()>;

    /// A directory went away; `record` is its last known state
    fn deleted_directory(
        &self,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()>;

    /// A file's content, modification time or ACL changed
    fn changed_file_content(
        &self,
        file: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()>;

    /// A directory's ACL changed
    fn changed_directory_metadata(
        &self,
        dir: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()>;

    /// The pass finished; `checkpoint` addresses the end of the newest kept
    /// snapshot. A pass that changed nothing repeats the previous end, so
    /// these checkpoints never move backwards within one monitor run.
    fn pass_complete(&self, checkpoint: &MonitorCheckpoint) -> Result<()>;

    /// Whether anything was handed downstream since the last `pass_begin`
    fn has_enqueued_at_least_one_change_this_pass(&self) -> bool;

    /// The monitor rebuilt its snapshots after a fault; undelivered changes
    /// are void and `checkpoint` is the new restart point
    fn snapshot_stitched(&self, checkpoint: &MonitorCheckpoint) -> Result<()> {
        let _ = checkpoint;
        Ok(())
    }
}

/// Applies size and MIME limits on the way to another callback.
///
/// A rejected new file is dropped. A file that changes into something the
/// consumer cannot take is reported as deleted, so the consumer forgets
/// the stale version.
pub struct FilteringCallback<C> {
    inner: C,
    oracle: Arc<dyn ContentOracle>,
    rejections: Arc<dyn RejectionSink>,
}

impl<C: MonitorCallback> FilteringCallback<C> {
    /// Wrap `inner`
    pub fn new(inner: C, oracle: Arc<dyn ContentOracle>, rejections: Arc<dyn RejectionSink>) -> Self {
        Self {
            inner,
            oracle,
            rejections,
        }
    }

    /// Wrapped callback
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn accepts(&self, file: &dyn FileInfo) -> Result<bool> {
        let verdict = match self.oracle.check(file) {
            Ok(verdict) => verdict,
            Err(e) if e.is_not_visible() || e.is_entry_fault() => Some(RejectReason::NotReadable),
            Err(e) => return Err(e),
        };
        match verdict {
            Some(reason) => {
                self.rejections.reject(file.path(), &reason);
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

impl<C: MonitorCallback> MonitorCallback for FilteringCallback<C> {
    fn pass_begin(&self) -> Result<()> {
        self.inner.pass_begin()
    }

    fn new_file(
        &self,
        file: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        if self.accepts(file)? {
            self.inner.new_file(file, record, checkpoint)
        } else {
            Ok(())
        }
    }

    fn new_directory(
        &self,
        dir: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.inner.new_directory(dir, record, checkpoint)
    }

    fn deleted_file(&self, record: &SnapshotRecord, checkpoint: &MonitorCheckpoint) -> Result<()> {
        self.inner.deleted_file(record, checkpoint)
    }

    fn deleted_directory(
        &self,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.inner.deleted_directory(record, checkpoint)
    }

    fn changed_file_content(
        &self,
        file: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        if self.accepts(file)? {
            self.inner.changed_file_content(file, record, checkpoint)
        } else {
            self.inner.deleted_file(record, checkpoint)
        }
    }

    fn changed_directory_metadata(
        &self,
        dir: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.inner.changed_directory_metadata(dir, record, checkpoint)
    }

    fn pass_complete(&self, checkpoint: &MonitorCheckpoint) -> Result<()> {
        self.inner.pass_complete(checkpoint)
    }

    fn has_enqueued_at_least_one_change_this_pass(&self) -> bool {
        self.inner.has_enqueued_at_least_one_change_this_pass()
    }

    fn snapshot_stitched(&self, checkpoint: &MonitorCheckpoint) -> Result<()> {
        self.inner.snapshot_stitched(checkpoint)
    }
}
