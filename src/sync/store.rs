//! Numbered snapshot files of one monitored root
//!
//! Layout of a store directory:
//!
//! ```text
//! <state_dir>/<monitor_name>/
//!     snap.1            JSON lines, one SnapshotRecord per line
//!     snap.2
//!     checkpoint.json   last checkpoint accepted by the consumer
//! ```
//!
//! Snapshot 0 is the implicit empty snapshot. A pass reads the most recent
//! snapshot while writing the next number. Files are never modified once
//! written; recovery after a crash builds a brand new file with
//! [`SnapshotStore::stitch`].

use crate::error::{IoResultExt, Result, SnapWatchError};
use crate::sync::checkpoint::MonitorCheckpoint;
use crate::sync::snapshot::SnapshotRecord;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_PREFIX: &str = "snap.";
const GUARANTEE_FILE: &str = "checkpoint.json";
const STITCH_TEMP_FILE: &str = "stitch.tmp";

/// Write `value` as JSON through a temp file and rename it into place
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let file = File::create(&temp_path).with_path(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| SnapWatchError::RecoveryState(format!("{}: {}", temp_path.display(), e)))?;
    writer.flush().with_path(&temp_path)?;
    writer.get_ref().sync_all().with_path(&temp_path)?;

    std::fs::rename(&temp_path, path).with_path(path)?;
    Ok(())
}

/// Read a JSON file written by [`write_json_atomic`]; `None` if absent
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).with_path(path)?;
    let value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| SnapWatchError::RecoveryState(format!("{}: {}", path.display(), e)))?;
    Ok(Some(value))
}

/// Streams the records of one snapshot in order
#[derive(Debug)]
pub struct SnapshotReader {
    number: i64,
    path: Option<PathBuf>,
    input: Option<BufReader<File>>,
    peeked: Option<SnapshotRecord>,
    records_read: i64,
    lines_seen: u64,
}

impl SnapshotReader {
    /// Reader over the implicit empty snapshot
    pub fn empty() -> Self {
        Self {
            number: 0,
            path: None,
            input: None,
            peeked: None,
            records_read: 0,
            lines_seen: 0,
        }
    }

    fn open(number: i64, path: PathBuf) -> Result<Self> {
        let file = File::open(&path).with_path(&path)?;
        Ok(Self {
            number,
            path: Some(path),
            input: Some(BufReader::new(file)),
            peeked: None,
            records_read: 0,
            lines_seen: 0,
        })
    }

    /// Snapshot number being read (0 for the empty snapshot)
    pub fn number(&self) -> i64 {
        self.number
    }

    /// Records consumed so far
    pub fn records_read(&self) -> i64 {
        self.records_read
    }

    /// Next record without consuming it
    pub fn peek(&mut self) -> Result<Option<&SnapshotRecord>> {
        if self.peeked.is_none() {
            self.peeked = self.read_line()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Consume the next record
    pub fn next_record(&mut self) -> Result<Option<SnapshotRecord>> {
        let record = match self.peeked.take() {
            Some(record) => Some(record),
            None => self.read_line()?,
        };
        if record.is_some() {
            self.records_read += 1;
        }
        Ok(record)
    }

    /// Consume `count` records, failing if the snapshot is shorter
    pub fn skip(&mut self, count: i64) -> Result<()> {
        for _ in 0..count {
            if self.next_record()?.is_none() {
                return Err(SnapWatchError::incomplete(
                    self.path.clone().unwrap_or_default(),
                    format!(
                        "snapshot {} ended after {} records, expected at least {}",
                        self.number, self.records_read, count
                    ),
                ));
            }
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<SnapshotRecord>> {
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };
        let path = self.path.clone().unwrap_or_default();

        let mut line = String::new();
        let read = input.read_line(&mut line).with_path(&path)?;
        if read == 0 {
            self.input = None;
            return Ok(None);
        }
        self.lines_seen += 1;

        if !line.ends_with('\n') {
            tracing::warn!(
                "Discarding truncated record {} at end of {}",
                self.lines_seen,
                path.display()
            );
            self.input = None;
            return Ok(None);
        }

        serde_json::from_str(line.trim_end())
            .map(Some)
            .map_err(|e| SnapWatchError::SnapshotCorrupt {
                path,
                record: self.lines_seen,
                message: e.to_string(),
            })
    }
}

/// Appends records to a new snapshot, enforcing snapshot order
#[derive(Debug)]
pub struct SnapshotWriter {
    number: i64,
    path: PathBuf,
    out: BufWriter<File>,
    last: Option<SnapshotRecord>,
    records_written: i64,
}

impl SnapshotWriter {
    fn create(number: i64, path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_path(&path)?;
        Ok(Self {
            number,
            path,
            out: BufWriter::with_capacity(256 * 1024, file),
            last: None,
            records_written: 0,
        })
    }

    /// Snapshot number being written
    pub fn number(&self) -> i64 {
        self.number
    }

    /// Records written so far
    pub fn records_written(&self) -> i64 {
        self.records_written
    }

    /// Append one record; it must sort strictly after the previous one
    pub fn write(&mut self, record: &SnapshotRecord) -> Result<()> {
        if let Some(previous) = &self.last {
            if previous.compare(record) != Ordering::Less {
                return Err(SnapWatchError::SnapshotOrder {
                    previous: previous.path.clone(),
                    next: record.path.clone(),
                });
            }
        }

        let line = serde_json::to_string(record).map_err(|e| SnapWatchError::SnapshotCorrupt {
            path: self.path.clone(),
            record: self.records_written as u64 + 1,
            message: e.to_string(),
        })?;
        self.out.write_all(line.as_bytes()).with_path(&self.path)?;
        self.out.write_all(b"\n").with_path(&self.path)?;

        self.records_written += 1;
        self.last = Some(record.clone());
        Ok(())
    }

    /// Push buffered records to the file
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().with_path(&self.path)
    }

    /// Flush and fsync
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        self.out.get_ref().sync_all().with_path(&self.path)
    }
}

/// Summary of a store for status output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSummary {
    /// Monitor owning the store
    pub monitor_name: String,
    /// Store directory
    pub directory: PathBuf,
    /// Snapshot numbers on disk, ascending
    pub snapshots: Vec<i64>,
    /// Last accepted checkpoint
    pub guarantee: Option<MonitorCheckpoint>,
}

/// The snapshot files of one monitored root
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    monitor_name: String,
    guarantee: Mutex<Option<MonitorCheckpoint>>,
}

impl SnapshotStore {
    /// Open (creating if needed) the store for `monitor_name` under `state_dir`
    pub fn open(state_dir: &Path, monitor_name: &str) -> Result<Self> {
        let dir = Self::directory_for(state_dir, monitor_name);
        std::fs::create_dir_all(&dir).with_path(&dir)?;
        let guarantee = read_json(&dir.join(GUARANTEE_FILE))?;
        Ok(Self {
            dir,
            monitor_name: monitor_name.to_string(),
            guarantee: Mutex::new(guarantee),
        })
    }

    /// Store directory for a monitor
    pub fn directory_for(state_dir: &Path, monitor_name: &str) -> PathBuf {
        state_dir.join(monitor_name)
    }

    /// Whether a store directory exists for a monitor
    pub fn exists(state_dir: &Path, monitor_name: &str) -> bool {
        Self::directory_for(state_dir, monitor_name).is_dir()
    }

    /// Remove a monitor's store directory entirely
    pub fn remove(state_dir: &Path, monitor_name: &str) -> Result<()> {
        let dir = Self::directory_for(state_dir, monitor_name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).with_path(&dir)?;
        }
        Ok(())
    }

    /// Store directory
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Owning monitor
    pub fn monitor_name(&self) -> &str {
        &self.monitor_name
    }

    fn snapshot_path(&self, number: i64) -> PathBuf {
        self.dir.join(format!("{}{}", SNAPSHOT_PREFIX, number))
    }

    /// Snapshot numbers present on disk, ascending
    pub fn snapshot_numbers(&self) -> Result<Vec<i64>> {
        let mut numbers = Vec::new();
        for entry in std::fs::read_dir(&self.dir).with_path(&self.dir)? {
            let entry = entry.with_path(&self.dir)?;
            let name = entry.file_name();
            let number = name
                .to_str()
                .and_then(|n| n.strip_prefix(SNAPSHOT_PREFIX))
                .and_then(|n| n.parse::<i64>().ok());
            if let Some(number) = number {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Highest snapshot number on disk, 0 if none
    pub fn most_recent_number(&self) -> Result<i64> {
        Ok(self.snapshot_numbers()?.last().copied().unwrap_or(0))
    }

    /// Open the most recent snapshot, or the empty snapshot if there is none
    pub fn open_most_recent_snapshot(&self) -> Result<SnapshotReader> {
        match self.most_recent_number()? {
            0 => Ok(SnapshotReader::empty()),
            number => SnapshotReader::open(number, self.snapshot_path(number)),
        }
    }

    /// Create the next snapshot file (most recent + 1)
    pub fn open_new_snapshot_writer(&self) -> Result<SnapshotWriter> {
        let number = self.most_recent_number()? + 1;
        SnapshotWriter::create(number, self.snapshot_path(number))
    }

    /// Finish a pass: fsync the writer and release the reader
    pub fn close(&self, reader: Option<SnapshotReader>, writer: Option<SnapshotWriter>) -> Result<()> {
        drop(reader);
        match writer {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }

    /// Delete one snapshot file
    pub fn delete_snapshot(&self, number: i64) -> Result<()> {
        let path = self.snapshot_path(number);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapWatchError::io(path, e)),
        }
    }

    /// Delete snapshots no checkpoint can refer to any more.
    ///
    /// Keeps the most recent snapshot and, when a guarantee is known,
    /// every snapshot from `guarantee.snapshot_number - 1` on, which is
    /// what [`Self::stitch`] needs to rebuild it.
    pub fn delete_old_snapshots(&self) -> Result<usize> {
        let numbers = self.snapshot_numbers()?;
        let Some(&latest) = numbers.last() else {
            return Ok(0);
        };
        let floor = self
            .load_guarantee()
            .map(|g| g.snapshot_number - 1)
            .unwrap_or(latest);

        let mut deleted = 0;
        for number in numbers {
            if number != latest && number < floor {
                self.delete_snapshot(number)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::debug!("Deleted {} old snapshots in {}", deleted, self.dir.display());
        }
        Ok(deleted)
    }

    /// Rebuild the state as of `checkpoint` into a fresh snapshot.
    ///
    /// For checkpoint `(s, r, w)` the result is the first `w` records of
    /// snapshot `s` followed by snapshot `s - 1` from record `r` on. It is
    /// written with a number above every existing snapshot, every other
    /// snapshot is removed, and the equivalent checkpoint `(n, 0, len)` is
    /// returned and persisted as the new guarantee.
    pub fn stitch(&self, checkpoint: &MonitorCheckpoint) -> Result<MonitorCheckpoint> {
        let numbers = self.snapshot_numbers()?;
        let s = checkpoint.snapshot_number;
        let (r, w) = (checkpoint.read_record_number, checkpoint.write_record_number);

        if !numbers.contains(&s) {
            return Err(SnapWatchError::incomplete(
                &self.dir,
                format!("snapshot {} for checkpoint {} is missing", s, checkpoint),
            ));
        }
        let predecessor = if numbers.contains(&(s - 1)) {
            SnapshotReader::open(s - 1, self.snapshot_path(s - 1))?
        } else if r == 0 {
            SnapshotReader::empty()
        } else {
            return Err(SnapWatchError::incomplete(
                &self.dir,
                format!(
                    "snapshot {} needed to resume checkpoint {} is missing",
                    s - 1,
                    checkpoint
                ),
            ));
        };

        let temp_path = self.dir.join(STITCH_TEMP_FILE);
        if temp_path.exists() {
            std::fs::remove_file(&temp_path).with_path(&temp_path)?;
        }
        let new_number = numbers.last().copied().unwrap_or(0) + 1;
        let mut writer = SnapshotWriter::create(new_number, temp_path.clone())?;

        let mut head = SnapshotReader::open(s, self.snapshot_path(s))?;
        for _ in 0..w {
            match head.next_record()? {
                Some(record) => writer.write(&record)?,
                None => {
                    return Err(SnapWatchError::incomplete(
                        &self.dir,
                        format!(
                            "snapshot {} holds {} records, checkpoint {} needs {}",
                            s,
                            head.records_read(),
                            checkpoint,
                            w
                        ),
                    ))
                }
            }
        }

        let mut tail = predecessor;
        tail.skip(r)?;
        while let Some(record) = tail.next_record()? {
            writer.write(&record)?;
        }

        let len = writer.records_written();
        writer.finish()?;
        let final_path = self.snapshot_path(new_number);
        std::fs::rename(&temp_path, &final_path).with_path(&final_path)?;

        for number in numbers {
            self.delete_snapshot(number)?;
        }

        let stitched = MonitorCheckpoint::new(&self.monitor_name, new_number, 0, len);
        self.replace_guarantee(stitched.clone())?;

        tracing::info!(
            "Stitched snapshot {} ({} records) for {} from checkpoint {}",
            new_number,
            len,
            self.monitor_name,
            checkpoint
        );
        Ok(stitched)
    }

    /// Persist a newly accepted checkpoint.
    ///
    /// Returns `false` and leaves the stored guarantee alone when
    /// `checkpoint` is older than what is already accepted.
    pub fn accept_guarantee(&self, checkpoint: &MonitorCheckpoint) -> Result<bool> {
        if checkpoint.monitor_name != self.monitor_name {
            return Err(SnapWatchError::InvalidCheckpoint(checkpoint.to_string()));
        }
        let mut guarantee = self.guarantee.lock();
        if let Some(current) = guarantee.as_ref() {
            if checkpoint <= current {
                return Ok(false);
            }
        }
        write_json_atomic(&self.dir.join(GUARANTEE_FILE), checkpoint)?;
        *guarantee = Some(checkpoint.clone());
        Ok(true)
    }

    fn replace_guarantee(&self, checkpoint: MonitorCheckpoint) -> Result<()> {
        let mut guarantee = self.guarantee.lock();
        write_json_atomic(&self.dir.join(GUARANTEE_FILE), &checkpoint)?;
        *guarantee = Some(checkpoint);
        Ok(())
    }

    /// Last accepted checkpoint
    pub fn load_guarantee(&self) -> Option<MonitorCheckpoint> {
        self.guarantee.lock().clone()
    }

    /// Status summary
    pub fn summary(&self) -> Result<StoreSummary> {
        Ok(StoreSummary {
            monitor_name: self.monitor_name.clone(),
            directory: self.dir.clone(),
            snapshots: self.snapshot_numbers()?,
            guarantee: self.load_guarantee(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Acl;
    use tempfile::TempDir;

    fn file(path: &str) -> SnapshotRecord {
        SnapshotRecord::file("local", path, 1, Acl::public(), "c", 0)
    }

    fn write_snapshot(store: &SnapshotStore, paths: &[&str]) -> i64 {
        let mut writer = store.open_new_snapshot_writer().unwrap();
        for path in paths {
            writer.write(&file(path)).unwrap();
        }
        let number = writer.number();
        store.close(None, Some(writer)).unwrap();
        number
    }

    fn read_paths(store: &SnapshotStore) -> Vec<String> {
        let mut reader = store.open_most_recent_snapshot().unwrap();
        let mut paths = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            paths.push(record.path);
        }
        paths
    }

    #[test]
    fn test_empty_store_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        let mut reader = store.open_most_recent_snapshot().unwrap();
        assert_eq!(reader.number(), 0);
        assert!(reader.peek().unwrap().is_none());
        assert_eq!(store.open_new_snapshot_writer().unwrap().number(), 1);
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        assert_eq!(write_snapshot(&store, &["/a", "/b"]), 1);
        assert_eq!(read_paths(&store), vec!["/a", "/b"]);

        let mut reader = store.open_most_recent_snapshot().unwrap();
        assert_eq!(reader.peek().unwrap().map(|r| r.path.clone()), Some("/a".to_string()));
        assert_eq!(reader.records_read(), 0);
        reader.next_record().unwrap();
        assert_eq!(reader.records_read(), 1);
    }

    #[test]
    fn test_writer_rejects_out_of_order_records() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        let mut writer = store.open_new_snapshot_writer().unwrap();
        writer.write(&file("/b")).unwrap();
        let err = writer.write(&file("/a")).unwrap_err();
        assert!(matches!(err, SnapWatchError::SnapshotOrder { .. }));
        assert!(writer.write(&file("/b")).is_err());
    }

    #[test]
    fn test_truncated_trailing_record_is_dropped() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        write_snapshot(&store, &["/a", "/b"]);

        let path = store.directory().join("snap.1");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"file_system_type\":\"lo").unwrap();

        assert_eq!(read_paths(&store), vec!["/a", "/b"]);
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        std::fs::write(store.directory().join("snap.1"), b"not json\n").unwrap();
        let mut reader = store.open_most_recent_snapshot().unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, SnapWatchError::SnapshotCorrupt { record: 1, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_stitch_combines_head_and_tail() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        write_snapshot(&store, &["/a", "/b", "/c", "/d"]);
        // interrupted pass: /a unchanged, /b deleted, /bb new
        write_snapshot(&store, &["/a", "/bb", "/c"]);

        // after emitting "new /bb": read 2 (/a, /b), wrote 2 (/a, /bb)
        let cp = MonitorCheckpoint::new("m", 2, 2, 2);
        let stitched = store.stitch(&cp).unwrap();

        assert_eq!(stitched, MonitorCheckpoint::new("m", 3, 0, 4));
        assert_eq!(store.snapshot_numbers().unwrap(), vec![3]);
        assert_eq!(read_paths(&store), vec!["/a", "/bb", "/c", "/d"]);
        assert_eq!(store.load_guarantee(), Some(stitched.clone()));

        // stitching again from the stitched checkpoint is a no-op rebuild
        let again = store.stitch(&stitched).unwrap();
        assert_eq!(again, MonitorCheckpoint::new("m", 4, 0, 4));
        assert_eq!(read_paths(&store), vec!["/a", "/bb", "/c", "/d"]);
    }

    #[test]
    fn test_stitch_first_snapshot_without_predecessor() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        write_snapshot(&store, &["/a", "/b", "/c"]);

        let stitched = store.stitch(&MonitorCheckpoint::new("m", 1, 0, 2)).unwrap();
        assert_eq!(stitched.write_record_number, 2);
        assert_eq!(read_paths(&store), vec!["/a", "/b"]);
    }

    #[test]
    fn test_stitch_reports_missing_state() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        write_snapshot(&store, &["/a"]);

        let missing = store.stitch(&MonitorCheckpoint::new("m", 5, 0, 0)).unwrap_err();
        assert!(matches!(missing, SnapWatchError::IncompleteSnapshot { .. }));

        let no_predecessor = store.stitch(&MonitorCheckpoint::new("m", 1, 3, 0)).unwrap_err();
        assert!(matches!(no_predecessor, SnapWatchError::IncompleteSnapshot { .. }));

        let short = store.stitch(&MonitorCheckpoint::new("m", 1, 0, 9)).unwrap_err();
        assert!(matches!(short, SnapWatchError::IncompleteSnapshot { .. }));
        assert_eq!(store.snapshot_numbers().unwrap(), vec![1]);
    }

    #[test]
    fn test_delete_old_snapshots_respects_guarantee() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        for _ in 0..5 {
            write_snapshot(&store, &["/a"]);
        }

        store.accept_guarantee(&MonitorCheckpoint::new("m", 3, 1, 1)).unwrap();
        assert_eq!(store.delete_old_snapshots().unwrap(), 1);
        assert_eq!(store.snapshot_numbers().unwrap(), vec![2, 3, 4, 5]);

        store.accept_guarantee(&MonitorCheckpoint::new("m", 5, 1, 1)).unwrap();
        store.delete_old_snapshots().unwrap();
        assert_eq!(store.snapshot_numbers().unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_delete_old_snapshots_without_guarantee_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        for _ in 0..3 {
            write_snapshot(&store, &["/a"]);
        }
        store.delete_old_snapshots().unwrap();
        assert_eq!(store.snapshot_numbers().unwrap(), vec![3]);
    }

    #[test]
    fn test_guarantee_is_monotone_and_durable() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), "m").unwrap();
        assert!(store.accept_guarantee(&MonitorCheckpoint::new("m", 2, 3, 4)).unwrap());
        assert!(!store.accept_guarantee(&MonitorCheckpoint::new("m", 2, 1, 1)).unwrap());
        drop(store);

        let reopened = SnapshotStore::open(dir.path(), "m").unwrap();
        assert_eq!(reopened.load_guarantee(), Some(MonitorCheckpoint::new("m", 2, 3, 4)));
        assert!(SnapshotStore::exists(dir.path(), "m"));
        SnapshotStore::remove(dir.path(), "m").unwrap();
        assert!(!SnapshotStore::exists(dir.path(), "m"));
    }
}
