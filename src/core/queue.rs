//! Consumer-acknowledged change queue
//!
//! Monitors push changes in; the consumer pulls batches out and
//! acknowledges them by [`GlobalCheckpoint`], a sequence number assigned
//! on enqueue. An acknowledgement advances the restart point of every
//! monitor whose changes it covers and forwards that checkpoint to the
//! monitor's [`SnapshotStore`] as its new guarantee.
//!
//! The restart points are persisted after every acknowledgement
//! together with a short history, so a consumer that restarts from an
//! older global position still finds matching monitor checkpoints:
//!
//! ```text
//! <state_dir>/queue.json
//! ```
//!
//! Delivery is at-least-once. Anything handed out but not acknowledged
//! before a crash is emitted again after the restart.

use crate::core::callback::{Change, ChangeKind, ChangeSubject, MonitorCallback};
use crate::error::{IoResultExt, Result, SnapWatchError};
use crate::fs::FileInfo;
use crate::sync::store::{read_json, write_json_atomic};
use crate::sync::{GlobalCheckpoint, MonitorCheckpoint, SnapshotRecord, SnapshotStore};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RECOVERY_FILE: &str = "queue.json";
const RECOVERY_VERSION: u32 = 1;

const ENQUEUE_BACKOFF_START: Duration = Duration::from_millis(10);
const ENQUEUE_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// A change with its queue position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedChange {
    pub global: GlobalCheckpoint,
    #[serde(flatten)]
    pub change: Change,
}

/// Restart points as of one acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecoveryEntry {
    global: GlobalCheckpoint,
    restart_points: BTreeMap<String, MonitorCheckpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecoveryState {
    version: u32,
    history: Vec<RecoveryEntry>,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<QueuedChange>,
    /// Highest sequence handed to the consumer
    delivered: u64,
    next_seq: u64,
    restart_points: BTreeMap<String, MonitorCheckpoint>,
    history: VecDeque<RecoveryEntry>,
    interrupted: bool,
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub undelivered: usize,
    pub last_acknowledged: Option<GlobalCheckpoint>,
}

/// Bounded, durable, consumer-acknowledged change queue
pub struct ChangeQueue {
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    history_limit: usize,
    recovery_path: PathBuf,
    stores: Mutex<HashMap<String, Arc<SnapshotStore>>>,
}

impl ChangeQueue {
    /// Open the queue, loading recovery state from `state_dir`
    pub fn open(state_dir: &Path, capacity: usize, history_limit: usize) -> Result<Self> {
        std::fs::create_dir_all(state_dir).with_path(state_dir)?;
        let recovery_path = state_dir.join(RECOVERY_FILE);

        let history: VecDeque<RecoveryEntry> = match read_json::<RecoveryState>(&recovery_path)? {
            Some(state) if state.version == RECOVERY_VERSION => state.history.into(),
            Some(state) => {
                return Err(SnapWatchError::RecoveryState(format!(
                    "{}: unsupported version {}",
                    recovery_path.display(),
                    state.version
                )))
            }
            None => VecDeque::new(),
        };
        let last = history.back().map(|e| e.global.0).unwrap_or(0);

        Ok(Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                delivered: last,
                next_seq: last + 1,
                restart_points: history
                    .back()
                    .map(|e| e.restart_points.clone())
                    .unwrap_or_default(),
                history,
                interrupted: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
            history_limit: history_limit.max(1),
            recovery_path,
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// Route acknowledgements for `monitor_name` to `store`
    pub fn register(&self, monitor_name: &str, store: Arc<SnapshotStore>) {
        self.stores.lock().insert(monitor_name.to_string(), store);
    }

    /// Derive per-monitor restart points for a consumer position.
    ///
    /// Uses the newest acknowledgement at or before `global` and forgets
    /// everything after it; new sequence numbers continue from `global`.
    /// Without a global position every monitor starts from scratch.
    pub fn get_monitor_restart_points(
        &self,
        global: Option<GlobalCheckpoint>,
    ) -> Result<HashMap<String, MonitorCheckpoint>> {
        let mut state = self.state.lock();
        state.pending.clear();

        let points = match global {
            Some(global) => {
                while state.history.back().is_some_and(|e| e.global > global) {
                    state.history.pop_back();
                }
                let points = match state.history.back() {
                    Some(entry) => entry.restart_points.clone(),
                    None => {
                        tracing::warn!(
                            "No recovery state at or before global checkpoint {}; starting all roots from scratch",
                            global
                        );
                        BTreeMap::new()
                    }
                };
                state.delivered = global.0;
                state.next_seq = global.0 + 1;
                points
            }
            None => {
                state.history.clear();
                state.delivered = 0;
                state.next_seq = 1;
                BTreeMap::new()
            }
        };

        state.restart_points = points.clone();
        self.persist(&state)?;
        Ok(points.into_iter().collect())
    }

    /// Append a change, waiting while the queue is full.
    ///
    /// Fails with [`SnapWatchError::Cancelled`] once [`Self::interrupt`]
    /// has been called.
    pub fn enqueue(&self, change: Change) -> Result<GlobalCheckpoint> {
        let mut state = self.state.lock();
        let mut backoff = ENQUEUE_BACKOFF_START;

        loop {
            if state.interrupted {
                return Err(SnapWatchError::Cancelled);
            }
            if state.pending.len() < self.capacity {
                break;
            }
            tracing::debug!("Change queue full, waiting {:?}", backoff);
            self.not_full.wait_for(&mut state, backoff);
            backoff = (backoff * 2).min(ENQUEUE_BACKOFF_MAX);
        }

        let global = GlobalCheckpoint(state.next_seq);
        state.next_seq += 1;
        state.pending.push_back(QueuedChange { global, change });
        self.not_empty.notify_all();
        Ok(global)
    }

    /// Hand out up to `max` undelivered changes in order, waiting up to
    /// `timeout` for the first one.
    pub fn next_batch(&self, max: usize, timeout: Duration) -> Vec<QueuedChange> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            let delivered = state.delivered;
            let batch: Vec<QueuedChange> = state
                .pending
                .iter()
                .filter(|c| c.global.0 > delivered)
                .take(max)
                .cloned()
                .collect();
            if let Some(last) = batch.last() {
                state.delivered = last.global.0;
                return batch;
            }
            if state.interrupted || self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return Vec::new();
            }
        }
    }

    /// Acknowledge every change up to and including `global`.
    ///
    /// Returns the number of changes removed. A stale or repeated
    /// acknowledgement removes nothing and is not an error.
    pub fn acknowledge(&self, global: GlobalCheckpoint) -> Result<usize> {
        let (removed, guarantees) = {
            let mut state = self.state.lock();
            let mut removed = 0;
            let mut advanced: BTreeMap<String, MonitorCheckpoint> = BTreeMap::new();

            while state.pending.front().is_some_and(|c| c.global <= global) {
                let Some(queued) = state.pending.pop_front() else {
                    break;
                };
                let checkpoint = queued.change.checkpoint;
                let name = checkpoint.monitor_name.clone();
                let merged = match state.restart_points.remove(&name) {
                    Some(current) => current.max_of(checkpoint),
                    None => checkpoint,
                };
                state.restart_points.insert(name.clone(), merged.clone());
                advanced.insert(name, merged);
                removed += 1;
            }
            if removed == 0 {
                return Ok(0);
            }

            state.delivered = state.delivered.max(global.0);
            let entry = RecoveryEntry {
                global,
                restart_points: state.restart_points.clone(),
            };
            state.history.push_back(entry);
            while state.history.len() > self.history_limit {
                state.history.pop_front();
            }
            self.persist(&state)?;
            self.not_full.notify_all();
            (removed, advanced)
        };

        let stores = self.stores.lock().clone();
        for (name, checkpoint) in guarantees {
            let Some(store) = stores.get(&name) else {
                tracing::warn!("No store registered for monitor {}", name);
                continue;
            };
            match store.accept_guarantee(&checkpoint) {
                Ok(true) => tracing::debug!("Accepted {}", checkpoint),
                Ok(false) => tracing::debug!("Ignored stale checkpoint {}", checkpoint),
                Err(e) => tracing::warn!("Could not accept checkpoint {}: {}", checkpoint, e),
            }
        }
        Ok(removed)
    }

    /// Re-anchor a monitor after it stitched its snapshots.
    ///
    /// Its undelivered and unacknowledged changes are dropped (the next
    /// pass emits them again) and every recorded restart point is moved
    /// into the stitched numbering.
    pub fn rebase(&self, monitor_name: &str, checkpoint: &MonitorCheckpoint) -> Result<()> {
        let dropped = self.reanchor(monitor_name, Some(checkpoint))?;
        tracing::info!(
            "Rebased monitor {} to {} ({} queued changes dropped)",
            monitor_name,
            checkpoint,
            dropped
        );
        Ok(())
    }

    /// Forget a monitor that restarts from an empty snapshot
    pub fn reset(&self, monitor_name: &str) -> Result<()> {
        let dropped = self.reanchor(monitor_name, None)?;
        tracing::debug!(
            "Reset monitor {} ({} queued changes dropped)",
            monitor_name,
            dropped
        );
        Ok(())
    }

    fn reanchor(&self, monitor_name: &str, checkpoint: Option<&MonitorCheckpoint>) -> Result<usize> {
        let mut state = self.state.lock();
        let previous = match checkpoint {
            Some(cp) => state
                .restart_points
                .insert(monitor_name.to_string(), cp.clone()),
            None => state.restart_points.remove(monitor_name),
        };

        let before = state.pending.len();
        state
            .pending
            .retain(|c| c.change.checkpoint.monitor_name != monitor_name);
        let dropped = before - state.pending.len();

        for entry in state.history.iter_mut() {
            let current = entry.restart_points.remove(monitor_name);
            if let (Some(cp), Some(current)) = (checkpoint, current) {
                if previous.as_ref() == Some(&current) {
                    entry
                        .restart_points
                        .insert(monitor_name.to_string(), cp.clone());
                }
            }
        }
        self.persist(&state)?;
        self.not_full.notify_all();
        Ok(dropped)
    }

    /// Current restart point of one monitor
    pub fn restart_point(&self, monitor_name: &str) -> Option<MonitorCheckpoint> {
        self.state.lock().restart_points.get(monitor_name).cloned()
    }

    /// Wake and fail every blocked producer and consumer
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Accept work again after [`Self::interrupt`]
    pub fn resume(&self) {
        self.state.lock().interrupted = false;
    }

    /// Drop every queued change; recovery state is kept
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.delivered = state.next_seq - 1;
        self.not_full.notify_all();
    }

    /// Drop everything including the persisted recovery state
    pub fn clean(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.pending.clear();
        state.history.clear();
        state.restart_points.clear();
        state.delivered = 0;
        state.next_seq = 1;
        self.stores.lock().clear();
        match std::fs::remove_file(&self.recovery_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapWatchError::io(&self.recovery_path, e)),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.pending.len(),
            undelivered: state
                .pending
                .iter()
                .filter(|c| c.global.0 > state.delivered)
                .count(),
            last_acknowledged: state.history.back().map(|e| e.global),
        }
    }

    fn persist(&self, state: &QueueState) -> Result<()> {
        let recovery = RecoveryState {
            version: RECOVERY_VERSION,
            history: state.history.iter().cloned().collect(),
        };
        write_json_atomic(&self.recovery_path, &recovery)
    }
}

/// Feeds one monitor's changes into the shared queue
pub struct QueueFeed {
    queue: Arc<ChangeQueue>,
    monitor_name: String,
    enqueued: AtomicBool,
}

impl QueueFeed {
    pub fn new(queue: Arc<ChangeQueue>, monitor_name: impl Into<String>) -> Self {
        Self {
            queue,
            monitor_name: monitor_name.into(),
            enqueued: AtomicBool::new(false),
        }
    }

    fn push(
        &self,
        kind: ChangeKind,
        entry: Option<&dyn FileInfo>,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        let length = match entry {
            Some(file) if !record.is_directory() => file.length().ok(),
            _ => None,
        };
        let change = Change::new(
            kind,
            ChangeSubject::from_record(record, length),
            checkpoint.clone(),
        );
        self.queue.enqueue(change)?;
        self.enqueued.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl MonitorCallback for QueueFeed {
    fn pass_begin(&self) -> Result<()> {
        self.enqueued.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn new_file(
        &self,
        file: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.push(ChangeKind::NewFile, Some(file), record, checkpoint)
    }

    fn new_directory(
        &self,
        dir: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.push(ChangeKind::NewDir, Some(dir), record, checkpoint)
    }

    fn deleted_file(&self, record: &SnapshotRecord, checkpoint: &MonitorCheckpoint) -> Result<()> {
        self.push(ChangeKind::DeletedFile, None, record, checkpoint)
    }

    fn deleted_directory(
        &self,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.push(ChangeKind::DeletedDir, None, record, checkpoint)
    }

    fn changed_file_content(
        &self,
        file: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.push(ChangeKind::ChangedContent, Some(file), record, checkpoint)
    }

    fn changed_directory_metadata(
        &self,
        dir: &dyn FileInfo,
        record: &SnapshotRecord,
        checkpoint: &MonitorCheckpoint,
    ) -> Result<()> {
        self.push(ChangeKind::ChangedDirMetadata, Some(dir), record, checkpoint)
    }

    fn pass_complete(&self, checkpoint: &MonitorCheckpoint) -> Result<()> {
        tracing::debug!("Monitor {} pass complete at {}", self.monitor_name, checkpoint);
        Ok(())
    }

    fn has_enqueued_at_least_one_change_this_pass(&self) -> bool {
        self.enqueued.load(Ordering::SeqCst)
    }

    fn snapshot_stitched(&self, checkpoint: &MonitorCheckpoint) -> Result<()> {
        self.queue.rebase(&self.monitor_name, checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Acl;
    use tempfile::TempDir;

    fn change(monitor: &str, path: &str, s: i64, w: i64) -> Change {
        let record = SnapshotRecord::file("local", path, 1, Acl::public(), "c", 0);
        Change::new(
            ChangeKind::NewFile,
            ChangeSubject::from_record(&record, None),
            MonitorCheckpoint::new(monitor, s, 0, w),
        )
    }

    fn queue(dir: &TempDir, capacity: usize) -> ChangeQueue {
        ChangeQueue::open(dir.path(), capacity, 8).unwrap()
    }

    #[test]
    fn test_batches_follow_enqueue_order() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir, 16);
        for w in 1..=3 {
            q.enqueue(change("m", &format!("/r/{}", w), 1, w)).unwrap();
        }

        let first = q.next_batch(2, Duration::ZERO);
        assert_eq!(
            first.iter().map(|c| c.global).collect::<Vec<_>>(),
            vec![GlobalCheckpoint(1), GlobalCheckpoint(2)]
        );
        let second = q.next_batch(10, Duration::ZERO);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].change.subject.path, "/r/3");
        assert!(q.next_batch(10, Duration::from_millis(20)).is_empty());
    }

    #[test]
    fn test_acknowledge_forwards_guarantee() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir, 16);
        let store = Arc::new(SnapshotStore::open(dir.path(), "m").unwrap());
        q.register("m", store.clone());

        q.enqueue(change("m", "/r/a", 1, 1)).unwrap();
        q.enqueue(change("m", "/r/b", 1, 2)).unwrap();
        q.next_batch(10, Duration::ZERO);

        assert_eq!(q.acknowledge(GlobalCheckpoint(1)).unwrap(), 1);
        assert_eq!(store.load_guarantee(), Some(MonitorCheckpoint::new("m", 1, 0, 1)));
        assert_eq!(q.acknowledge(GlobalCheckpoint(2)).unwrap(), 1);
        assert_eq!(store.load_guarantee(), Some(MonitorCheckpoint::new("m", 1, 0, 2)));

        // repeated acknowledgement is a no-op
        assert_eq!(q.acknowledge(GlobalCheckpoint(2)).unwrap(), 0);
        assert_eq!(q.stats().pending, 0);
    }

    #[test]
    fn test_restart_points_follow_global_checkpoint() {
        let dir = TempDir::new().unwrap();
        {
            let q = queue(&dir, 16);
            q.enqueue(change("m1", "/a/1", 1, 1)).unwrap();
            q.enqueue(change("m2", "/b/1", 1, 1)).unwrap();
            q.acknowledge(GlobalCheckpoint(2)).unwrap();
            q.enqueue(change("m1", "/a/2", 1, 2)).unwrap();
            q.acknowledge(GlobalCheckpoint(3)).unwrap();
        }

        let q = queue(&dir, 16);
        let points = q.get_monitor_restart_points(Some(GlobalCheckpoint(2))).unwrap();
        assert_eq!(points["m1"], MonitorCheckpoint::new("m1", 1, 0, 1));
        assert_eq!(points["m2"], MonitorCheckpoint::new("m2", 1, 0, 1));

        // numbering continues after the consumer's position
        assert_eq!(q.enqueue(change("m1", "/a/2", 2, 1)).unwrap(), GlobalCheckpoint(3));

        // the newer acknowledgement was forgotten
        let q = queue(&dir, 16);
        let points = q.get_monitor_restart_points(Some(GlobalCheckpoint(9))).unwrap();
        assert_eq!(points["m1"], MonitorCheckpoint::new("m1", 1, 0, 1));
    }

    #[test]
    fn test_no_global_checkpoint_starts_from_scratch() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir, 16);
        q.enqueue(change("m", "/r/a", 1, 1)).unwrap();
        q.acknowledge(GlobalCheckpoint(1)).unwrap();

        assert!(q.get_monitor_restart_points(None).unwrap().is_empty());
        assert!(q
            .get_monitor_restart_points(Some(GlobalCheckpoint(1)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rebase_drops_monitor_changes() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir, 16);
        q.enqueue(change("m1", "/a/1", 1, 1)).unwrap();
        q.acknowledge(GlobalCheckpoint(1)).unwrap();
        q.enqueue(change("m1", "/a/2", 1, 2)).unwrap();
        q.enqueue(change("m2", "/b/1", 1, 1)).unwrap();

        let stitched = MonitorCheckpoint::new("m1", 3, 0, 1);
        q.rebase("m1", &stitched).unwrap();
        assert_eq!(q.restart_point("m1"), Some(stitched.clone()));

        let remaining = q.next_batch(10, Duration::ZERO);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].change.checkpoint.monitor_name, "m2");

        // the persisted history now speaks the stitched numbering
        let reopened = queue(&dir, 16);
        let points = reopened
            .get_monitor_restart_points(Some(GlobalCheckpoint(1)))
            .unwrap();
        assert_eq!(points["m1"], stitched);
    }

    #[test]
    fn test_reset_forgets_monitor() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir, 16);
        q.enqueue(change("m1", "/a/1", 5, 1)).unwrap();
        q.enqueue(change("m2", "/b/1", 1, 1)).unwrap();
        q.acknowledge(GlobalCheckpoint(2)).unwrap();

        q.reset("m1").unwrap();
        assert_eq!(q.restart_point("m1"), None);

        // a fresh numbering is not dominated by the forgotten one
        q.enqueue(change("m1", "/a/1", 1, 1)).unwrap();
        q.acknowledge(GlobalCheckpoint(3)).unwrap();
        assert_eq!(q.restart_point("m1"), Some(MonitorCheckpoint::new("m1", 1, 0, 1)));
        assert_eq!(q.restart_point("m2"), Some(MonitorCheckpoint::new("m2", 1, 0, 1)));
    }

    #[test]
    fn test_full_queue_waits_for_acknowledgement() {
        let dir = TempDir::new().unwrap();
        let q = Arc::new(queue(&dir, 1));
        q.enqueue(change("m", "/r/a", 1, 1)).unwrap();

        let producer = {
            let q = q.clone();
            std::thread::spawn(move || q.enqueue(change("m", "/r/b", 1, 2)))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(q.stats().pending, 1);

        q.acknowledge(GlobalCheckpoint(1)).unwrap();
        assert_eq!(producer.join().unwrap().unwrap(), GlobalCheckpoint(2));
    }

    #[test]
    fn test_interrupt_releases_blocked_producer() {
        let dir = TempDir::new().unwrap();
        let q = Arc::new(queue(&dir, 1));
        q.enqueue(change("m", "/r/a", 1, 1)).unwrap();

        let producer = {
            let q = q.clone();
            std::thread::spawn(move || q.enqueue(change("m", "/r/b", 1, 2)))
        };
        std::thread::sleep(Duration::from_millis(50));
        q.interrupt();
        let result = producer.join().unwrap();
        assert!(matches!(result, Err(SnapWatchError::Cancelled)));

        q.resume();
        q.clear();
        assert!(q.enqueue(change("m", "/r/b", 1, 2)).is_ok());
    }

    #[test]
    fn test_clean_removes_recovery_state() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir, 16);
        q.enqueue(change("m", "/r/a", 1, 1)).unwrap();
        q.acknowledge(GlobalCheckpoint(1)).unwrap();
        assert!(dir.path().join(RECOVERY_FILE).exists());

        q.clean().unwrap();
        assert!(!dir.path().join(RECOVERY_FILE).exists());
        assert_eq!(q.stats(), QueueStats::default());
    }

    #[test]
    fn test_feed_tracks_pass_activity() {
        let dir = TempDir::new().unwrap();
        let q = Arc::new(queue(&dir, 16));
        let feed = QueueFeed::new(q.clone(), "m");
        let record = SnapshotRecord::file("local", "/r/a", 1, Acl::public(), "c", 0);
        let checkpoint = MonitorCheckpoint::new("m", 1, 1, 0);

        feed.pass_begin().unwrap();
        assert!(!feed.has_enqueued_at_least_one_change_this_pass());
        feed.deleted_file(&record, &checkpoint).unwrap();
        assert!(feed.has_enqueued_at_least_one_change_this_pass());

        let batch = q.next_batch(10, Duration::ZERO);
        assert_eq!(batch[0].change.kind, ChangeKind::DeletedFile);
        assert_eq!(batch[0].change.subject.length, None);

        feed.pass_begin().unwrap();
        assert!(!feed.has_enqueued_at_least_one_change_this_pass());
    }
}
