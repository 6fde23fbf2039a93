//! Resumable position markers
//!
//! Every change leaves a monitor tagged with a [`MonitorCheckpoint`]: the
//! snapshot being written and how many records had been read from the
//! previous snapshot and written to the new one at that moment. Replaying
//! a pass from a checkpoint (see [`crate::sync::SnapshotStore::stitch`])
//! reproduces exactly the state the consumer had acknowledged.
//!
//! The consumer only sees [`GlobalCheckpoint`]s, which are queue sequence
//! numbers.

use crate::config::HashAlgorithm;
use crate::error::SnapWatchError;
use crate::hash::hash_bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Bytes of the start-path digest used as the monitor name
const MONITOR_NAME_BYTES: usize = 16;

/// Deterministic monitor name for a root start path
pub fn monitor_name(start_path: &str) -> String {
    let digest = hash_bytes(start_path.as_bytes(), HashAlgorithm::Sha256).hash;
    digest[..MONITOR_NAME_BYTES * 2].to_string()
}

/// Position in one monitor's checkpoint stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorCheckpoint {
    /// Name of the emitting monitor
    pub monitor_name: String,
    /// Snapshot being written
    pub snapshot_number: i64,
    /// Records consumed from the previous snapshot
    pub read_record_number: i64,
    /// Records written to the current snapshot
    pub write_record_number: i64,
}

impl MonitorCheckpoint {
    /// Create a checkpoint
    pub fn new(
        monitor_name: impl Into<String>,
        snapshot_number: i64,
        read_record_number: i64,
        write_record_number: i64,
    ) -> Self {
        Self {
            monitor_name: monitor_name.into(),
            snapshot_number,
            read_record_number,
            write_record_number,
        }
    }

    fn position(&self) -> (i64, i64, i64) {
        (
            self.snapshot_number,
            self.read_record_number,
            self.write_record_number,
        )
    }

    /// Later of two checkpoints of the same monitor; `self` when incomparable
    pub fn max_of(self, other: MonitorCheckpoint) -> MonitorCheckpoint {
        match self.partial_cmp(&other) {
            Some(Ordering::Less) => other,
            _ => self,
        }
    }
}

impl PartialOrd for MonitorCheckpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.monitor_name != other.monitor_name {
            return None;
        }
        Some(self.position().cmp(&other.position()))
    }
}

impl fmt::Display for MonitorCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.monitor_name, self.snapshot_number, self.read_record_number, self.write_record_number
        )
    }
}

impl FromStr for MonitorCheckpoint {
    type Err = SnapWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SnapWatchError::InvalidCheckpoint(s.to_string());
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 4 || parts[0].is_empty() {
            return Err(invalid());
        }
        let number = |i: usize| parts[i].parse::<i64>().map_err(|_| invalid());
        Ok(Self::new(parts[0], number(1)?, number(2)?, number(3)?))
    }
}

/// Consumer-visible queue position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalCheckpoint(pub u64);

impl GlobalCheckpoint {
    /// Sequence number
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GlobalCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GlobalCheckpoint {
    type Err = SnapWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(GlobalCheckpoint)
            .map_err(|_| SnapWatchError::InvalidCheckpoint(s.to_string()))
    }
}
