//! Supervision of one monitor thread per configured root
//!
//! Startup decides per root whether the previous snapshots can be resumed
//! (stitched to the restart point derived from the consumer's global
//! checkpoint) or must be rebuilt from scratch. Shutdown is cooperative
//! and bounded: a thread that does not finish in time is logged and left
//! behind, and the next start repairs its snapshots by stitching.

use crate::config::MonitorConfig;
use crate::core::callback::FilteringCallback;
use crate::core::monitor::{
    shutdown_channel, Monitor, MonitorOptions, MonitorState, MonitorStatus, ShutdownSignal,
    ShutdownTrigger,
};
use crate::core::queue::{ChangeQueue, QueueFeed};
use crate::error::{IoResultExt, Result, SnapWatchError};
use crate::fs::{
    normalize_start_path, AclAggregator, ContentOracle, FileSystemType, LocalFileSystem,
    LoggingRejectionSink, MimeGuessOracle, PatternFilter, RejectionSink,
};
use crate::hash::{ChecksumGenerator, DigestChecksum};
use crate::sync::{monitor_name, GlobalCheckpoint, MonitorCheckpoint, SnapshotStore, StoreSummary};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Status of one configured root
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub root: String,
    pub monitor_name: String,
    pub state: MonitorState,
    pub passes: u64,
    pub guarantee: Option<MonitorCheckpoint>,
    pub last_error: Option<String>,
}

struct MonitorThread {
    root: String,
    name: String,
    store: Arc<SnapshotStore>,
    status: Arc<MonitorStatus>,
    handle: JoinHandle<Result<()>>,
    done: Receiver<()>,
}

struct Running {
    trigger: ShutdownTrigger,
    threads: Vec<MonitorThread>,
}

/// Owns the monitor threads and the shared change queue
pub struct MonitorManager {
    config: MonitorConfig,
    file_system: Arc<dyn FileSystemType>,
    checksums: Arc<dyn ChecksumGenerator>,
    oracle: Arc<dyn ContentOracle>,
    rejections: Arc<dyn RejectionSink>,
    queue: Arc<ChangeQueue>,
    running: Option<Running>,
}

impl MonitorManager {
    /// Create a manager for `config` using the local-disk transport
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let aggregator = AclAggregator::new(config.security_policy)
            .with_formats(config.user_format, config.group_format);
        let queue = ChangeQueue::open(
            &config.state_dir,
            config.queue_capacity,
            config.recovery_history,
        )?;

        Ok(Self {
            file_system: Arc::new(
                LocalFileSystem::with_aggregator(aggregator)
                    .preserving_access_time(config.preserve_access_time),
            ),
            checksums: Arc::new(DigestChecksum::new(config.checksum)),
            oracle: Arc::new(MimeGuessOracle::new(config.max_size, config.mime_filter)),
            rejections: Arc::new(LoggingRejectionSink),
            queue: Arc::new(queue),
            running: None,
            config,
        })
    }

    /// Use another transport
    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystemType>) -> Self {
        self.file_system = file_system;
        self
    }

    /// Use another checksum generator
    pub fn with_checksums(mut self, checksums: Arc<dyn ChecksumGenerator>) -> Self {
        self.checksums = checksums;
        self
    }

    /// Use another size/MIME policy
    pub fn with_oracle(mut self, oracle: Arc<dyn ContentOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Report rejected entries somewhere else
    pub fn with_rejections(mut self, rejections: Arc<dyn RejectionSink>) -> Self {
        self.rejections = rejections;
        self
    }

    /// The shared change queue
    pub fn queue(&self) -> Arc<ChangeQueue> {
        self.queue.clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start one monitor per root, resuming from the consumer's position
    pub fn start(&mut self, global: Option<GlobalCheckpoint>) -> Result<()> {
        if self.running.is_some() {
            return Err(SnapWatchError::InvalidState(
                "monitors are already running".to_string(),
            ));
        }
        self.config.validate()?;
        let patterns = PatternFilter::new(
            &self.config.include_patterns,
            &self.config.exclude_patterns,
        )?;

        self.queue.resume();
        let restart_points = self.queue.get_monitor_restart_points(global)?;
        tracing::info!(
            "Starting {} monitors from global checkpoint {}",
            self.config.roots.len(),
            global.map(|g| g.to_string()).unwrap_or_else(|| "none".to_string())
        );

        let (trigger, signal) = shutdown_channel();
        self.running = Some(Running {
            trigger,
            threads: Vec::new(),
        });

        for root in self.config.roots.clone() {
            let spawned = root
                .to_str()
                .ok_or_else(|| {
                    SnapWatchError::config(format!("root is not valid UTF-8: {}", root.display()))
                })
                .and_then(|root| {
                    self.spawn_monitor(root, &restart_points, &patterns, signal.clone())
                });
            match spawned {
                Ok(thread) => {
                    if let Some(running) = self.running.as_mut() {
                        running.threads.push(thread);
                    }
                }
                Err(e) => {
                    tracing::error!("Could not start monitor for {}: {}", root.display(), e);
                    self.stop();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn spawn_monitor(
        &self,
        root: &str,
        restart_points: &HashMap<String, MonitorCheckpoint>,
        patterns: &PatternFilter,
        signal: ShutdownSignal,
    ) -> Result<MonitorThread> {
        let start_path = normalize_start_path(root);
        let name = monitor_name(&start_path);
        let store = Arc::new(self.prepare_store(&name, restart_points.get(&name))?);
        self.queue.register(&name, store.clone());

        let feed = FilteringCallback::new(
            QueueFeed::new(self.queue.clone(), name.clone()),
            self.oracle.clone(),
            self.rejections.clone(),
        );
        let status = Arc::new(MonitorStatus::new());
        let monitor = Monitor::new(
            &start_path,
            self.file_system.clone(),
            store.clone(),
            Arc::new(feed),
            self.checksums.clone(),
        )
        .with_patterns(patterns.clone())
        .with_rejections(self.rejections.clone())
        .with_options(MonitorOptions::from(&self.config))
        .with_status(status.clone());

        // the receiver sees a disconnect once the thread has finished
        let (done_tx, done_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name(format!("monitor-{}", &name[..8]))
            .spawn(move || {
                let _done = done_tx;
                monitor.run(&signal)
            })
            .map_err(|e| {
                SnapWatchError::from(e).with_context(format!("spawning monitor for {}", start_path))
            })?;

        Ok(MonitorThread {
            root: start_path,
            name,
            store,
            status,
            handle,
            done: done_rx,
        })
    }

    /// Open the store for one monitor, stitched to its restart point when
    /// possible and empty otherwise
    fn prepare_store(
        &self,
        name: &str,
        restart_point: Option<&MonitorCheckpoint>,
    ) -> Result<SnapshotStore> {
        let state_dir = &self.config.state_dir;

        if let Some(point) = restart_point {
            if SnapshotStore::exists(state_dir, name) {
                let store = SnapshotStore::open(state_dir, name)?;
                match store.stitch(point) {
                    Ok(stitched) => {
                        self.queue.rebase(name, &stitched)?;
                        return Ok(store);
                    }
                    Err(e) => tracing::warn!(
                        "Cannot resume monitor {} from {}: {}; starting from scratch",
                        name,
                        point,
                        e
                    ),
                }
            }
        }

        tracing::info!("Monitor {} starts with a full traversal", name);
        SnapshotStore::remove(state_dir, name)?;
        self.queue.reset(name)?;
        SnapshotStore::open(state_dir, name)
    }

    /// Stop every monitor, waiting at most the configured shutdown timeout
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        tracing::info!("Stopping {} monitors", running.threads.len());
        running.trigger.trigger();
        self.queue.interrupt();

        let deadline = Instant::now() + self.config.shutdown_timeout();
        for thread in running.threads {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match thread.done.recv_timeout(remaining) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => match thread.handle.join() {
                    Ok(Ok(())) => tracing::debug!("Monitor for {} stopped", thread.root),
                    Ok(Err(e)) => {
                        tracing::warn!("Monitor for {} ended with error: {}", thread.root, e)
                    }
                    Err(_) => tracing::error!("Monitor thread for {} panicked", thread.root),
                },
                Err(RecvTimeoutError::Timeout) => tracing::warn!(
                    "Monitor for {} did not stop within {:?}; leaving it behind",
                    thread.root,
                    self.config.shutdown_timeout()
                ),
            }
        }
        self.queue.clear();
    }

    /// Stop and wipe all snapshot and recovery state
    pub fn clean(&mut self) -> Result<()> {
        self.stop();
        let dirs = monitor_directories(&self.config.state_dir)?;
        for dir in &dirs {
            std::fs::remove_dir_all(dir).with_path(dir)?;
        }
        self.queue.clean()?;
        tracing::info!(
            "Removed state of {} monitors from {}",
            dirs.len(),
            self.config.state_dir.display()
        );
        Ok(())
    }

    /// Per-root status
    pub fn status(&self) -> Vec<MonitorReport> {
        if let Some(running) = &self.running {
            return running
                .threads
                .iter()
                .map(|t| MonitorReport {
                    root: t.root.clone(),
                    monitor_name: t.name.clone(),
                    state: t.status.state(),
                    passes: t.status.passes(),
                    guarantee: t.store.load_guarantee(),
                    last_error: t.status.last_error(),
                })
                .collect();
        }

        self.config
            .roots
            .iter()
            .map(|root| {
                let start_path = normalize_start_path(&root.to_string_lossy());
                let name = monitor_name(&start_path);
                let guarantee = if SnapshotStore::exists(&self.config.state_dir, &name) {
                    SnapshotStore::open(&self.config.state_dir, &name)
                        .ok()
                        .and_then(|s| s.load_guarantee())
                } else {
                    None
                };
                MonitorReport {
                    root: start_path,
                    monitor_name: name,
                    state: MonitorState::Stopped,
                    passes: 0,
                    guarantee,
                    last_error: None,
                }
            })
            .collect()
    }
}

impl Drop for MonitorManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Summaries of every snapshot store under `state_dir`
pub fn stored_summaries(state_dir: &Path) -> Result<Vec<StoreSummary>> {
    let mut summaries = Vec::new();
    for dir in monitor_directories(state_dir)? {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        summaries.push(SnapshotStore::open(state_dir, name)?.summary()?);
    }
    Ok(summaries)
}

fn monitor_directories(state_dir: &Path) -> Result<Vec<PathBuf>> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(state_dir).with_path(state_dir)? {
        let entry = entry.with_path(state_dir)?;
        let is_monitor = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.len() == 32 && n.bytes().all(|b| b.is_ascii_hexdigit()));
        if is_monitor && entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
