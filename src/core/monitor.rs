//! Snapshot-diffing monitor for one root
//!
//! Each pass walks the live tree depth-first in snapshot order while
//! streaming the previous snapshot alongside it. Because both sides are
//! sorted the same way, the diff is a single merge:
//!
//! - old records that sort before the live entry were deleted,
//! - a record with the live entry's path is compared field by field,
//! - a live entry without a record is new.
//!
//! Every live entry produces a record in the new snapshot, and every
//! difference is reported to the [`MonitorCallback`] right after the
//! record is written, tagged with a resumable [`MonitorCheckpoint`].
//!
//! Checksums are the expensive part. A file whose previous record is
//! `stable` and whose modification time and ACL are unchanged keeps its
//! old checksum without reading the content.

use crate::config::MonitorConfig;
use crate::core::callback::{ChangeKind, MonitorCallback};
use crate::error::{Result, SnapWatchError};
use crate::fs::{
    check_file_eligibility, list_directory, normalize_start_path, Acl,
    DirectoryListing, FileInfo, FileSystemType, LoggingRejectionSink, PatternFilter, RejectReason,
    RejectionSink,
};
use crate::hash::ChecksumGenerator;
use crate::sync::{
    compare_paths, monitor_name, now_millis, MonitorCheckpoint, RecordKind, SnapshotReader,
    SnapshotRecord, SnapshotStore, SnapshotWriter,
};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Starting,
    Scanning,
    Idle,
    Recovering,
    Stopped,
    Fatal,
}

/// Shared, thread-safe view of a running monitor
#[derive(Debug)]
pub struct MonitorStatus {
    state: Mutex<MonitorState>,
    passes: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl MonitorStatus {
    /// Fresh status in the `Starting` state
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState::Starting),
            passes: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    /// Completed passes
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock() = state;
    }

    fn set_error(&self, error: &SnapWatchError) {
        *self.last_error.lock() = Some(error.to_string());
    }
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner side of a shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    flag: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
}

impl ShutdownTrigger {
    /// Set the flag and wake every waiting monitor
    pub fn trigger(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
        // dropping the sender disconnects every receiver
        self.wake.take();
    }
}

/// Monitor side of a shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    wake: Receiver<()>,
}

/// Create a connected trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded(0);
    (
        ShutdownTrigger {
            flag: flag.clone(),
            wake: Some(tx),
        },
        ShutdownSignal { flag, wake: rx },
    )
}

impl ShutdownSignal {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`; returns true if shutdown was requested
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.wake.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SnapWatchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Timing and traversal options of a monitor
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// How long a checksum must stay unchanged before it is trusted
    pub stability_interval: Duration,
    /// Sleep between passes
    pub idle_interval: Duration,
    /// Sleep before retrying a failed pass
    pub retry_delay: Duration,
    /// Files above this size are not hashed; the content oracle rejects them
    pub max_size: Option<u64>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            stability_interval: Duration::from_secs(5),
            idle_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            max_size: None,
        }
    }
}

impl From<&MonitorConfig> for MonitorOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            stability_interval: config.stability_interval(),
            idle_interval: config.idle_interval(),
            retry_delay: config.retry_delay(),
            max_size: config.max_size,
        }
    }
}

/// Counters of one completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Snapshot written by the pass
    pub snapshot_number: i64,
    /// Records in the new snapshot
    pub records: i64,
    /// Differences found (before consumer-side filtering)
    pub changes: u64,
    /// Records promoted to stable
    pub stability_upgrades: u64,
    /// Entries rejected by eligibility checks
    pub rejected: u64,
}

impl PassStats {
    /// Nothing differed and nothing was promoted; the snapshot is redundant
    pub fn is_unchanged(&self) -> bool {
        self.changes == 0 && self.stability_upgrades == 0
    }
}

/// A pass that did not complete
#[derive(Debug)]
pub struct PassFailure {
    pub error: SnapWatchError,
    /// Partial snapshot left behind, if the writer was opened
    pub snapshot_number: Option<i64>,
    /// Whether any change reached the consumer during the pass
    pub enqueued: bool,
}

struct PassContext<'a> {
    reader: SnapshotReader,
    writer: SnapshotWriter,
    stats: PassStats,
    now: i64,
    signal: &'a ShutdownSignal,
}

/// Watches one root by repeated snapshot diffing
pub struct Monitor {
    name: String,
    start_path: String,
    file_system: Arc<dyn FileSystemType>,
    store: Arc<SnapshotStore>,
    callback: Arc<dyn MonitorCallback>,
    checksums: Arc<dyn ChecksumGenerator>,
    patterns: PatternFilter,
    rejections: Arc<dyn RejectionSink>,
    options: MonitorOptions,
    status: Arc<MonitorStatus>,
    // end of the newest snapshot that survived its pass
    last_complete: Mutex<Option<MonitorCheckpoint>>,
}

impl Monitor {
    /// Create a monitor for `start_path`
    pub fn new(
        start_path: &str,
        file_system: Arc<dyn FileSystemType>,
        store: Arc<SnapshotStore>,
        callback: Arc<dyn MonitorCallback>,
        checksums: Arc<dyn ChecksumGenerator>,
    ) -> Self {
        let start_path = normalize_start_path(start_path);
        Self {
            name: monitor_name(&start_path),
            start_path,
            file_system,
            store,
            callback,
            checksums,
            patterns: PatternFilter::accept_all(),
            rejections: Arc::new(LoggingRejectionSink),
            options: MonitorOptions::default(),
            status: Arc::new(MonitorStatus::new()),
            last_complete: Mutex::new(None),
        }
    }

    /// Set include/exclude patterns
    pub fn with_patterns(mut self, patterns: PatternFilter) -> Self {
        self.patterns = patterns;
        self
    }

    /// Set where rejected entries are reported
    pub fn with_rejections(mut self, rejections: Arc<dyn RejectionSink>) -> Self {
        self.rejections = rejections;
        self
    }

    /// Set timing options
    pub fn with_options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    /// Share an externally owned status
    pub fn with_status(mut self, status: Arc<MonitorStatus>) -> Self {
        self.status = status;
        self
    }

    /// Monitor name (hash of the start path)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized start path
    pub fn start_path(&self) -> &str {
        &self.start_path
    }

    pub fn status(&self) -> Arc<MonitorStatus> {
        self.status.clone()
    }

    /// Pass loop with recovery; returns when shut down or on a fatal fault
    pub fn run(&self, signal: &ShutdownSignal) -> Result<()> {
        tracing::info!("Monitor {} watching {}", self.name, self.start_path);

        while !signal.is_cancelled() {
            self.status.set_state(MonitorState::Scanning);
            match self.run_pass(signal) {
                Ok(stats) => {
                    self.status.passes.fetch_add(1, Ordering::Relaxed);
                    self.finish_pass(&stats);
                    self.status.set_state(MonitorState::Idle);
                    if signal.wait(self.options.idle_interval) {
                        break;
                    }
                }
                Err(failure) if matches!(failure.error.root(), SnapWatchError::Cancelled) => {
                    tracing::info!("Pass over {} cancelled", self.start_path);
                    break;
                }
                Err(failure) => {
                    self.status.set_state(MonitorState::Recovering);
                    self.status.set_error(&failure.error);
                    if let Err(fatal) = self.recover(failure, signal) {
                        tracing::error!("Monitor {} stopped: {}", self.name, fatal);
                        self.status.set_error(&fatal);
                        self.status.set_state(MonitorState::Fatal);
                        return Err(fatal);
                    }
                }
            }
        }

        self.status.set_state(MonitorState::Stopped);
        tracing::info!("Monitor {} stopped", self.name);
        Ok(())
    }

    /// Run a single pass
    pub fn run_pass(&self, signal: &ShutdownSignal) -> std::result::Result<PassStats, PassFailure> {
        let failed = |error: SnapWatchError, snapshot_number: Option<i64>| PassFailure {
            error,
            snapshot_number,
            enqueued: self.callback.has_enqueued_at_least_one_change_this_pass(),
        };

        self.callback.pass_begin().map_err(|e| failed(e, None))?;
        let reader = self.store.open_most_recent_snapshot().map_err(|e| failed(e, None))?;
        let writer = self.store.open_new_snapshot_writer().map_err(|e| failed(e, None))?;
        let number = writer.number();
        let previous = reader.number();

        tracing::debug!(
            "Pass over {} reading snapshot {} writing {}",
            self.start_path,
            reader.number(),
            number
        );

        let mut ctx = PassContext {
            reader,
            writer,
            stats: PassStats {
                snapshot_number: number,
                ..Default::default()
            },
            now: now_millis(),
            signal,
        };
        let walked = self.walk(&mut ctx);

        let PassContext {
            reader,
            writer,
            mut stats,
            ..
        } = ctx;
        let end = self.checkpoint_at(&reader, &writer);
        stats.records = writer.records_written();
        let closed = self.store.close(Some(reader), Some(writer));

        walked.and(closed).map_err(|e| failed(e, Some(number)))?;
        let end = self.completed_checkpoint(end, previous, stats.is_unchanged());
        self.callback
            .pass_complete(&end)
            .map_err(|e| failed(e, Some(number)))?;

        tracing::info!(
            "Pass over {} complete: snapshot {}, {} records, {} changes, {} rejected",
            self.start_path,
            number,
            stats.records,
            stats.changes,
            stats.rejected
        );
        Ok(stats)
    }

    /// Checkpoint announced at the end of a pass. An unchanged snapshot is
    /// discarded by `finish_pass`, so such a pass re-announces the end of
    /// the snapshot it read when that end is known.
    fn completed_checkpoint(
        &self,
        end: MonitorCheckpoint,
        previous: i64,
        unchanged: bool,
    ) -> MonitorCheckpoint {
        let mut last = self.last_complete.lock();
        if unchanged {
            if let Some(kept) = last.as_ref().filter(|kept| kept.snapshot_number == previous) {
                return kept.clone();
            }
        }
        *last = Some(end.clone());
        end
    }

    fn finish_pass(&self, stats: &PassStats) {
        if stats.is_unchanged() {
            if let Err(e) = self.store.delete_snapshot(stats.snapshot_number) {
                tracing::warn!("Could not delete unchanged snapshot: {}", e);
            }
        }
        if let Err(e) = self.store.delete_old_snapshots() {
            tracing::warn!("Could not delete old snapshots: {}", e);
        }
    }

    fn recover(&self, failure: PassFailure, signal: &ShutdownSignal) -> Result<()> {
        let PassFailure {
            error,
            snapshot_number,
            enqueued,
        } = failure;
        if error.is_fatal() {
            return Err(error);
        }
        tracing::warn!("Pass over {} failed: {}", self.start_path, error);

        if !enqueued {
            if let Some(number) = snapshot_number {
                self.store.delete_snapshot(number)?;
            }
        } else {
            let guarantee = self.store.load_guarantee().ok_or_else(|| SnapWatchError::NoCheckpoint {
                monitor: self.name.clone(),
            })?;
            let stitched = self
                .store
                .stitch(&guarantee)
                .map_err(|e| e.with_context(format!("recovering {}", self.start_path)))?;
            *self.last_complete.lock() = None;
            self.callback.snapshot_stitched(&stitched)?;
            tracing::info!("Monitor {} resumes from {}", self.name, stitched);
        }

        signal.wait(self.options.retry_delay);
        Ok(())
    }

    fn walk(&self, ctx: &mut PassContext<'_>) -> Result<()> {
        let root = self.file_system.get_file(&self.start_path)?;
        let children = match list_directory(root.as_ref())? {
            DirectoryListing::Listed(children) => children,
            DirectoryListing::Failed(reason) => {
                return Err(SnapWatchError::unavailable(
                    self.start_path.clone(),
                    format!("cannot list root: {}", reason),
                ))
            }
        };

        let mut stack = vec![children.into_iter()];
        while let Some(siblings) = stack.last_mut() {
            ctx.signal.check()?;
            let Some(entry) = siblings.next() else {
                stack.pop();
                continue;
            };
            if let Some(children) = self.visit(ctx, entry.as_ref())? {
                stack.push(children.into_iter());
            }
        }

        while let Some(old) = ctx.reader.next_record()? {
            ctx.signal.check()?;
            self.emit_delete(ctx, old)?;
        }
        Ok(())
    }

    /// Merge one live entry; returns its children when it is a directory
    /// to descend into.
    fn visit(
        &self,
        ctx: &mut PassContext<'_>,
        entry: &dyn FileInfo,
    ) -> Result<Option<Vec<Box<dyn FileInfo>>>> {
        let Some(is_dir) = self.entry_value(ctx, entry.path(), entry.is_directory())? else {
            return Ok(None);
        };

        if is_dir {
            if !entry.matches_pattern(&self.patterns) {
                self.reject(ctx, entry.path(), RejectReason::PatternMismatch);
                return Ok(None);
            }
            let Some(acl) = self.entry_value(ctx, entry.path(), entry.acl())? else {
                return Ok(None);
            };
            let fresh =
                SnapshotRecord::directory(entry.file_system_type(), entry.path(), acl, ctx.now);
            self.merge_directory(ctx, entry, fresh)?;

            return match list_directory(entry)? {
                DirectoryListing::Listed(children) => Ok(Some(children)),
                DirectoryListing::Failed(reason) => {
                    tracing::warn!("Cannot list {}: {}; treating as empty", entry.path(), reason);
                    Ok(None)
                }
            };
        }

        if let Some(reason) = check_file_eligibility(entry, &self.patterns)? {
            self.reject(ctx, entry.path(), reason);
            return Ok(None);
        }
        let Some(last_modified) = self.entry_value(ctx, entry.path(), entry.last_modified())?
        else {
            return Ok(None);
        };
        let Some(acl) = self.entry_value(ctx, entry.path(), entry.acl())? else {
            return Ok(None);
        };
        self.merge_file(ctx, entry, last_modified, acl)?;
        Ok(None)
    }

    fn merge_directory(
        &self,
        ctx: &mut PassContext<'_>,
        entry: &dyn FileInfo,
        fresh: SnapshotRecord,
    ) -> Result<()> {
        self.delete_records_before(ctx, &fresh.path, true)?;
        let previous = take_same_path(&mut ctx.reader, &fresh.path)?;

        match previous {
            None => self.write_and_emit(ctx, entry, &fresh, ChangeKind::NewDir),
            Some(old) if old.kind != RecordKind::Dir => {
                self.emit_delete(ctx, old)?;
                self.write_and_emit(ctx, entry, &fresh, ChangeKind::NewDir)
            }
            Some(old) if old.acl != fresh.acl => {
                self.write_and_emit(ctx, entry, &fresh, ChangeKind::ChangedDirMetadata)
            }
            Some(old) => ctx.writer.write(&old),
        }
    }

    fn merge_file(
        &self,
        ctx: &mut PassContext<'_>,
        entry: &dyn FileInfo,
        last_modified: i64,
        acl: Acl,
    ) -> Result<()> {
        let path = entry.path();
        self.delete_records_before(ctx, path, false)?;

        let previous = ctx.reader.peek()?.filter(|r| r.path == path).cloned();
        let trusted = previous.as_ref().is_some_and(|old| {
            old.kind == RecordKind::File
                && old.stable
                && old.last_modified == last_modified
                && old.acl == acl
        });
        if trusted {
            if let Some(old) = ctx.reader.next_record()? {
                self.keep(ctx, old)?;
            }
            return Ok(());
        }

        let checksum = if self.exceeds_size_limit(entry) {
            // change detection falls back to mtime and ACL
            String::new()
        } else {
            match self.checksums.checksum(entry) {
                Ok(checksum) => checksum,
                Err(e) if e.is_not_visible() || e.is_entry_fault() => {
                    tracing::debug!("Cannot checksum {}: {}", path, e);
                    self.reject(ctx, path, RejectReason::NotReadable);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        };
        let fresh = SnapshotRecord::file(
            entry.file_system_type(),
            path,
            last_modified,
            acl,
            checksum,
            ctx.now,
        );

        let Some(old) = previous else {
            return self.write_and_emit(ctx, entry, &fresh, ChangeKind::NewFile);
        };
        ctx.reader.next_record()?;

        if old.kind != RecordKind::File {
            self.emit_delete(ctx, old)?;
            self.write_and_emit(ctx, entry, &fresh, ChangeKind::NewFile)
        } else if old.last_modified == fresh.last_modified
            && old.acl == fresh.acl
            && old.checksum == fresh.checksum
        {
            self.keep(ctx, old)
        } else {
            self.write_and_emit(ctx, entry, &fresh, ChangeKind::ChangedContent)
        }
    }

    /// Emit deletions for old records sorting before `path`
    fn delete_records_before(
        &self,
        ctx: &mut PassContext<'_>,
        path: &str,
        is_dir: bool,
    ) -> Result<()> {
        loop {
            let before = match ctx.reader.peek()? {
                Some(current) => {
                    current.path != path
                        && compare_paths(&current.path, current.is_directory(), path, is_dir)
                            == CmpOrdering::Less
                }
                None => false,
            };
            if !before {
                return Ok(());
            }
            if let Some(old) = ctx.reader.next_record()? {
                self.emit_delete(ctx, old)?;
            }
        }
    }

    /// Rewrite an unchanged record, promoting it to stable when due
    fn keep(&self, ctx: &mut PassContext<'_>, mut old: SnapshotRecord) -> Result<()> {
        let interval = self.options.stability_interval.as_millis() as i64;
        if old.kind == RecordKind::File && old.stability_due(ctx.now, interval) {
            old.stable = true;
            ctx.stats.stability_upgrades += 1;
        }
        ctx.writer.write(&old)
    }

    fn write_and_emit(
        &self,
        ctx: &mut PassContext<'_>,
        entry: &dyn FileInfo,
        record: &SnapshotRecord,
        kind: ChangeKind,
    ) -> Result<()> {
        ctx.writer.write(record)?;
        ctx.writer.flush()?;
        let checkpoint = self.checkpoint_at(&ctx.reader, &ctx.writer);
        ctx.stats.changes += 1;

        match kind {
            ChangeKind::NewFile => self.callback.new_file(entry, record, &checkpoint),
            ChangeKind::NewDir => self.callback.new_directory(entry, record, &checkpoint),
            ChangeKind::ChangedContent => {
                self.callback.changed_file_content(entry, record, &checkpoint)
            }
            ChangeKind::ChangedDirMetadata => {
                self.callback
                    .changed_directory_metadata(entry, record, &checkpoint)
            }
            ChangeKind::DeletedFile => self.callback.deleted_file(record, &checkpoint),
            ChangeKind::DeletedDir => self.callback.deleted_directory(record, &checkpoint),
        }
    }

    fn emit_delete(&self, ctx: &mut PassContext<'_>, old: SnapshotRecord) -> Result<()> {
        ctx.writer.flush()?;
        let checkpoint = self.checkpoint_at(&ctx.reader, &ctx.writer);
        ctx.stats.changes += 1;

        if old.is_directory() {
            self.callback.deleted_directory(&old, &checkpoint)
        } else {
            self.callback.deleted_file(&old, &checkpoint)
        }
    }

    /// Result of a per-entry query; `None` skips the entry. A local fault
    /// rejects the entry instead of failing the pass.
    fn entry_value<T>(
        &self,
        ctx: &mut PassContext<'_>,
        path: &str,
        result: Result<T>,
    ) -> Result<Option<T>> {
        match result {
            Err(e) if e.is_entry_fault() => {
                tracing::warn!("Skipping {}: {}", path, e);
                self.reject(ctx, path, RejectReason::NotReadable);
                Ok(None)
            }
            other => visible(other),
        }
    }

    fn exceeds_size_limit(&self, entry: &dyn FileInfo) -> bool {
        self.options
            .max_size
            .is_some_and(|limit| entry.length().is_ok_and(|size| size > limit))
    }

    fn reject(&self, ctx: &mut PassContext<'_>, path: &str, reason: RejectReason) {
        ctx.stats.rejected += 1;
        self.rejections.reject(path, &reason);
    }

    fn checkpoint_at(&self, reader: &SnapshotReader, writer: &SnapshotWriter) -> MonitorCheckpoint {
        MonitorCheckpoint::new(
            &self.name,
            writer.number(),
            reader.records_read(),
            writer.records_written(),
        )
    }
}

/// Treat "gone or invisible" as absence
fn visible<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_visible() => {
            tracing::debug!("Skipping entry: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn take_same_path(reader: &mut SnapshotReader, path: &str) -> Result<Option<SnapshotRecord>> {
    let same = matches!(reader.peek()?, Some(current) if current.path == path);
    if same {
        reader.next_record()
    } else {
        Ok(None)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport and recording callback shared by the core tests

    use super::*;
    use crate::core::callback::{Change, ChangeSubject};
    use crate::fs::Acl;
    use crate::hash::hash_bytes;
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone)]
    struct MemEntry {
        is_dir: bool,
        content: Vec<u8>,
        mtime: i64,
        acl: Acl,
    }

    /// Failure injected for one path
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Fault {
        NotFound,
        Denied,
        Io,
    }

    impl Fault {
        fn error(self, path: &str) -> SnapWatchError {
            match self {
                Self::NotFound => SnapWatchError::NotFound(path.to_string()),
                Self::Denied => SnapWatchError::PermissionDenied(path.to_string()),
                Self::Io => SnapWatchError::from_repository(
                    path,
                    std::io::Error::new(std::io::ErrorKind::Other, "input/output error"),
                ),
            }
        }
    }

    #[derive(Debug, Default)]
    struct MemState {
        entries: BTreeMap<String, MemEntry>,
        unavailable: bool,
        clock: i64,
        listing_faults: BTreeMap<String, Fault>,
        content_faults: BTreeMap<String, Fault>,
    }

    /// A mutable in-memory directory tree
    #[derive(Debug, Clone, Default)]
    pub struct MemTree {
        state: Arc<Mutex<MemState>>,
    }

    impl MemTree {
        pub fn new(root: &str) -> Self {
            let tree = Self::default();
            tree.add_dir(root);
            tree
        }

        fn parent(path: &str) -> Option<&str> {
            path.rfind('/').filter(|&i| i > 0).map(|i| &path[..i])
        }

        fn ensure_parents(state: &mut MemState, path: &str) {
            let mut ancestors = Vec::new();
            let mut current = Self::parent(path);
            while let Some(p) = current {
                ancestors.push(p.to_string());
                current = Self::parent(p);
            }
            for ancestor in ancestors.into_iter().rev() {
                let is_dir = state.entries.get(&ancestor).map(|e| e.is_dir);
                if is_dir != Some(true) {
                    state.entries.insert(
                        ancestor,
                        MemEntry {
                            is_dir: true,
                            content: Vec::new(),
                            mtime: 0,
                            acl: Acl::public(),
                        },
                    );
                }
            }
        }

        fn remove_locked(state: &mut MemState, path: &str) {
            let prefix = format!("{}/", path);
            state
                .entries
                .retain(|p, _| p != path && !p.starts_with(&prefix));
        }

        pub fn add_file(&self, path: &str, content: &[u8]) {
            let mut state = self.state.lock();
            if state.entries.get(path).is_some_and(|e| e.is_dir) {
                Self::remove_locked(&mut state, path);
            }
            Self::ensure_parents(&mut state, path);
            state.clock += 1;
            let mtime = state.clock;
            state.entries.insert(
                path.to_string(),
                MemEntry {
                    is_dir: false,
                    content: content.to_vec(),
                    mtime,
                    acl: Acl::public(),
                },
            );
        }

        pub fn add_dir(&self, path: &str) {
            let mut state = self.state.lock();
            if state.entries.get(path).is_some_and(|e| e.is_dir) {
                return;
            }
            state.entries.remove(path);
            Self::ensure_parents(&mut state, path);
            state.entries.insert(
                path.to_string(),
                MemEntry {
                    is_dir: true,
                    content: Vec::new(),
                    mtime: 0,
                    acl: Acl::public(),
                },
            );
        }

        pub fn remove(&self, path: &str) {
            Self::remove_locked(&mut self.state.lock(), path);
        }

        /// Rewrite content keeping the old modification time
        pub fn overwrite_keep_mtime(&self, path: &str, content: &[u8]) {
            if let Some(entry) = self.state.lock().entries.get_mut(path) {
                entry.content = content.to_vec();
            }
        }

        pub fn set_acl(&self, path: &str, acl: Acl) {
            if let Some(entry) = self.state.lock().entries.get_mut(path) {
                entry.acl = acl;
            }
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.state.lock().unavailable = unavailable;
        }

        /// Make listing `path` fail; `None` heals it
        pub fn fail_listing(&self, path: &str, fault: Option<Fault>) {
            let mut state = self.state.lock();
            match fault {
                Some(fault) => state.listing_faults.insert(path.to_string(), fault),
                None => state.listing_faults.remove(path),
            };
        }

        /// Make reading the content of `path` fail; `None` heals it
        pub fn fail_content(&self, path: &str, fault: Option<Fault>) {
            let mut state = self.state.lock();
            match fault {
                Some(fault) => state.content_faults.insert(path.to_string(), fault),
                None => state.content_faults.remove(path),
            };
        }

        /// Live entries under `root` as (path, is_dir)
        pub fn live(&self, root: &str) -> BTreeMap<String, bool> {
            let prefix = format!("{}/", root);
            self.state
                .lock()
                .entries
                .iter()
                .filter(|(p, _)| p.starts_with(&prefix))
                .map(|(p, e)| (p.clone(), e.is_dir))
                .collect()
        }

        fn with_entry<T>(&self, path: &str, f: impl FnOnce(&MemEntry) -> T) -> Result<T> {
            let state = self.state.lock();
            if state.unavailable {
                return Err(SnapWatchError::unavailable(path, "share offline"));
            }
            state
                .entries
                .get(path)
                .map(f)
                .ok_or_else(|| SnapWatchError::NotFound(path.to_string()))
        }
    }

    #[derive(Debug)]
    pub struct MemFile {
        tree: MemTree,
        path: String,
    }

    impl FileInfo for MemFile {
        fn path(&self) -> &str {
            &self.path
        }

        fn file_system_type(&self) -> &str {
            "memory"
        }

        fn is_directory(&self) -> Result<bool> {
            self.tree.with_entry(&self.path, |e| e.is_dir)
        }

        fn is_regular_file(&self) -> Result<bool> {
            self.tree.with_entry(&self.path, |e| !e.is_dir)
        }

        fn exists(&self) -> Result<bool> {
            Ok(self.tree.with_entry(&self.path, |_| ()).is_ok())
        }

        fn can_read(&self) -> Result<bool> {
            self.tree.with_entry(&self.path, |_| true)
        }

        fn length(&self) -> Result<u64> {
            self.tree.with_entry(&self.path, |e| e.content.len() as u64)
        }

        fn last_modified(&self) -> Result<i64> {
            self.tree.with_entry(&self.path, |e| e.mtime)
        }

        fn list_children(&self) -> Result<Vec<Box<dyn FileInfo>>> {
            self.tree.with_entry(&self.path, |_| ())?;
            let state = self.tree.state.lock();
            if let Some(fault) = state.listing_faults.get(&self.path) {
                return Err(fault.error(&self.path));
            }
            let prefix = format!("{}/", self.path);
            Ok(state
                .entries
                .keys()
                .filter(|p| p.starts_with(&prefix) && !p[prefix.len()..].contains('/'))
                .map(|p| {
                    Box::new(MemFile {
                        tree: self.tree.clone(),
                        path: p.clone(),
                    }) as Box<dyn FileInfo>
                })
                .collect())
        }

        fn acl(&self) -> Result<Acl> {
            self.tree.with_entry(&self.path, |e| e.acl.clone())
        }

        fn open_content(&self) -> Result<Box<dyn Read + Send>> {
            if let Some(fault) = self.tree.state.lock().content_faults.get(&self.path) {
                return Err(fault.error(&self.path));
            }
            let content = self.tree.with_entry(&self.path, |e| e.content.clone())?;
            Ok(Box::new(std::io::Cursor::new(content)))
        }
    }

    pub struct MemFileSystem(pub MemTree);

    impl FileSystemType for MemFileSystem {
        fn name(&self) -> &str {
            "memory"
        }

        fn is_path(&self, path: &str) -> bool {
            path.starts_with('/')
        }

        fn get_file(&self, path: &str) -> Result<Box<dyn FileInfo>> {
            Ok(Box::new(MemFile {
                tree: self.0.clone(),
                path: path.to_string(),
            }))
        }
    }

    /// Checksum generator counting how often content is read
    #[derive(Default)]
    pub struct CountingChecksum {
        pub calls: AtomicUsize,
    }

    impl ChecksumGenerator for CountingChecksum {
        fn checksum(&self, file: &dyn FileInfo) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut content = Vec::new();
            file.open_content()?.read_to_end(&mut content)?;
            Ok(hash_bytes(&content, crate::config::HashAlgorithm::XXHash3).hash)
        }
    }

    /// Records every change; optionally fails after a number of changes
    #[derive(Default)]
    pub struct RecordingCallback {
        pub changes: Mutex<Vec<Change>>,
        pub stitched: Mutex<Vec<MonitorCheckpoint>>,
        pub completed: Mutex<Vec<MonitorCheckpoint>>,
        enqueued: AtomicBool,
        fail_after: Mutex<Option<usize>>,
    }

    impl RecordingCallback {
        pub fn fail_after(&self, changes: Option<usize>) {
            *self.fail_after.lock() = changes;
        }

        pub fn take(&self) -> Vec<Change> {
            std::mem::take(&mut *self.changes.lock())
        }

        pub fn kinds_and_paths(changes: &[Change]) -> Vec<(ChangeKind, String)> {
            changes
                .iter()
                .map(|c| (c.kind, c.subject.path.clone()))
                .collect()
        }

        fn push(
            &self,
            kind: ChangeKind,
            record: &SnapshotRecord,
            checkpoint: &MonitorCheckpoint,
        ) -> Result<()> {
            let mut fail_after = self.fail_after.lock();
            if let Some(remaining) = fail_after.as_mut() {
                if *remaining == 0 {
                    return Err(SnapWatchError::unavailable(&record.path, "consumer went away"));
                }
                *remaining -= 1;
            }
            self.changes.lock().push(Change::new(
                kind,
                ChangeSubject::from_record(record, None),
                checkpoint.clone(),
            ));
            self.enqueued.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    impl MonitorCallback for RecordingCallback {
        fn pass_begin(&self) -> Result<()> {
            self.enqueued.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn new_file(&self, _: &dyn FileInfo, r: &SnapshotRecord, c: &MonitorCheckpoint) -> Result<()> {
            self.push(ChangeKind::NewFile, r, c)
        }

        fn new_directory(&self, _: &dyn FileInfo, r: &SnapshotRecord, c: &MonitorCheckpoint) -> Result<()> {
            self.push(ChangeKind::NewDir, r, c)
        }

        fn deleted_file(&self, r: &SnapshotRecord, c: &MonitorCheckpoint) -> Result<()> {
            self.push(ChangeKind::DeletedFile, r, c)
        }

        fn deleted_directory(&self, r: &SnapshotRecord, c: &MonitorCheckpoint) -> Result<()> {
            self.push(ChangeKind::DeletedDir, r, c)
        }

        fn changed_file_content(&self, _: &dyn FileInfo, r: &SnapshotRecord, c: &MonitorCheckpoint) -> Result<()> {
            self.push(ChangeKind::ChangedContent, r, c)
        }

        fn changed_directory_metadata(&self, _: &dyn FileInfo, r: &SnapshotRecord, c: &MonitorCheckpoint) -> Result<()> {
            self.push(ChangeKind::ChangedDirMetadata, r, c)
        }

        fn pass_complete(&self, checkpoint: &MonitorCheckpoint) -> Result<()> {
            self.completed.lock().push(checkpoint.clone());
            Ok(())
        }

        fn has_enqueued_at_least_one_change_this_pass(&self) -> bool {
            self.enqueued.load(Ordering::SeqCst)
        }

        fn snapshot_stitched(&self, checkpoint: &MonitorCheckpoint) -> Result<()> {
            self.stitched.lock().push(checkpoint.clone());
            Ok(())
        }
    }

    /// Apply changes to a path -> is_dir mirror
    pub fn apply(mirror: &mut BTreeMap<String, bool>, changes: &[Change]) {
        for change in changes {
            match change.kind {
                ChangeKind::NewFile | ChangeKind::ChangedContent => {
                    mirror.insert(change.subject.path.clone(), false);
                }
                ChangeKind::NewDir | ChangeKind::ChangedDirMetadata => {
                    mirror.insert(change.subject.path.clone(), true);
                }
                ChangeKind::DeletedFile | ChangeKind::DeletedDir => {
                    mirror.remove(&change.subject.path);
                }
            }
        }
    }
}
