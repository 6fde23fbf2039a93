//! Error types for SnapWatch
//!
//! This module defines all error types used throughout the crate. Errors
//! fall into four groups that the monitor treats differently:
//!
//! - repository faults raised by the file access layer: per-entry faults
//!   (`NotFound`, `PermissionDenied`, `EntryIo`) that skip one entry, and
//!   `RepositoryUnavailable`, which aborts the pass,
//! - persisted-state faults raised by the snapshot store and the recovery
//!   state (`Io`, `Snapshot*`, `IncompleteSnapshot`, `RecoveryState`),
//! - fatal recovery faults (`NoCheckpoint`),
//! - everything else (configuration, cancellation, queue plumbing).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for SnapWatch operations
#[derive(Error, Debug)]
pub enum SnapWatchError {
    /// I/O error on persisted state
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory no longer exists
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Insufficient access to read a file or list a directory
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Local I/O fault confined to one file or directory
    #[error("I/O error on '{path}': {message}")]
    EntryIo { path: String, message: String },

    /// The repository (share, mount, disk) is temporarily unreachable
    #[error("Repository unavailable at '{path}': {message}")]
    RepositoryUnavailable { path: String, message: String },

    /// Snapshot file could not be decoded
    #[error("Corrupt snapshot '{path}' at record {record}: {message}")]
    SnapshotCorrupt {
        path: PathBuf,
        record: u64,
        message: String,
    },

    /// Records were written out of order
    #[error("Snapshot order violation: '{previous}' must sort before '{next}'")]
    SnapshotOrder { previous: String, next: String },

    /// Snapshot files needed for stitching are missing or short
    #[error("Incomplete snapshot state in '{dir}': {message}")]
    IncompleteSnapshot { dir: PathBuf, message: String },

    /// Queue recovery state could not be read or written
    #[error("Recovery state error: {0}")]
    RecoveryState(String),

    /// A persisted-state fault occurred and there is no checkpoint to recover from
    #[error("Monitor '{monitor}' has no accepted checkpoint to recover from; run clean before restarting")]
    NoCheckpoint { monitor: String },

    /// Invalid checkpoint string
    #[error("Invalid checkpoint '{0}'")]
    InvalidCheckpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation cancelled by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// Manager is already running or not running
    #[error("Invalid manager state: {0}")]
    InvalidState(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SnapWatchError>,
    },
}

impl SnapWatchError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a repository-unavailable error
    pub fn unavailable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RepositoryUnavailable {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an incomplete snapshot error
    pub fn incomplete(dir: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::IncompleteSnapshot {
            dir: dir.into(),
            message: message.into(),
        }
    }

    /// Map an I/O error raised while touching the repository (not our own
    /// state) into the repository fault taxonomy.
    ///
    /// Only connection-level failures mean the repository is unreachable;
    /// anything else (EIO, ENOTDIR, ENAMETOOLONG, ...) stays with the entry.
    pub fn from_repository(path: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(path.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            ErrorKind::NotConnected
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe => Self::unavailable(path, err.to_string()),
            _ => Self::EntryIo {
                path: path.to_string(),
                message: err.to_string(),
            },
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Strip any context wrappers
    pub fn root(&self) -> &SnapWatchError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is recoverable by the monitor recovery loop
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::Io { .. }
                | Self::EntryIo { .. }
                | Self::RepositoryUnavailable { .. }
                | Self::SnapshotCorrupt { .. }
                | Self::SnapshotOrder { .. }
                | Self::IncompleteSnapshot { .. }
                | Self::RecoveryState(_)
        )
    }

    /// Check if this error terminates a monitor for good
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), Self::NoCheckpoint { .. } | Self::ConfigError(_))
    }

    /// Check if this error means the entry is gone or invisible to us
    pub fn is_not_visible(&self) -> bool {
        match self.root() {
            Self::NotFound(_) | Self::PermissionDenied(_) => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }

    /// Check if this error is a local fault on a single entry
    pub fn is_entry_fault(&self) -> bool {
        matches!(self.root(), Self::EntryIo { .. })
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<String> {
        match self {
            Self::Io { path, .. }
            | Self::SnapshotCorrupt { path, .. }
            | Self::IncompleteSnapshot { dir: path, .. } => {
                Some(path.to_string_lossy().into_owned())
            }
            Self::NotFound(path)
            | Self::PermissionDenied(path)
            | Self::EntryIo { path, .. }
            | Self::RepositoryUnavailable { path, .. } => Some(path.clone()),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for SnapWatch operations
pub type Result<T> = std::result::Result<T, SnapWatchError>;

impl From<std::io::Error> for SnapWatchError {
    fn from(err: std::io::Error) -> Self {
        SnapWatchError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for SnapWatchError {
    fn from(err: serde_json::Error) -> Self {
        SnapWatchError::RecoveryState(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SnapWatchError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SnapWatchError::io("/test/path", io_err);
        assert_eq!(err.path().as_deref(), Some("/test/path"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_repository_taxonomy() {
        let gone = SnapWatchError::from_repository(
            "/a",
            std::io::Error::new(std::io::ErrorKind::NotFound, "x"),
        );
        assert!(matches!(gone, SnapWatchError::NotFound(_)));
        assert!(gone.is_not_visible());
        assert!(!gone.is_recoverable());

        let denied = SnapWatchError::from_repository(
            "/a",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "x"),
        );
        assert!(denied.is_not_visible());

        let flaky = SnapWatchError::from_repository(
            "/a",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "x"),
        );
        assert!(matches!(flaky, SnapWatchError::RepositoryUnavailable { .. }));
        assert!(flaky.is_recoverable());
        assert!(!flaky.is_entry_fault());
    }

    #[test]
    fn test_local_io_fault_stays_with_entry() {
        for kind in [
            std::io::ErrorKind::Other,
            std::io::ErrorKind::InvalidInput,
            std::io::ErrorKind::UnexpectedEof,
        ] {
            let err = SnapWatchError::from_repository("/a/d", std::io::Error::new(kind, "x"));
            assert!(err.is_entry_fault(), "{:?}", kind);
            assert!(!err.is_not_visible());
            assert_eq!(err.path().as_deref(), Some("/a/d"));
        }

        #[cfg(unix)]
        {
            // EIO
            let eio =
                SnapWatchError::from_repository("/a/f", std::io::Error::from_raw_os_error(5));
            assert!(matches!(eio, SnapWatchError::EntryIo { .. }));
        }
    }

    #[test]
    fn test_fatal_through_context() {
        let err = SnapWatchError::NoCheckpoint {
            monitor: "abc".to_string(),
        }
        .with_context("recovering");
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
    }
}
