//! Eligibility filtering for monitored entries
//!
//! Two layers decide whether an entry takes part in a pass:
//!
//! - [`PatternFilter`] applies include/exclude globs inside the monitor,
//!   so excluded entries never reach a snapshot.
//! - [`ContentOracle`] answers size and MIME questions for the consumer
//!   side; it is applied by [`crate::core::FilteringCallback`] on the way
//!   out, so changing its limits never rewrites history.
//!
//! Every rejection is reported through a [`RejectionSink`].

use crate::error::{Result, SnapWatchError};
use crate::fs::access::FileInfo;
use globset::{Glob, GlobSet, GlobSetBuilder};
use humansize::{format_size, BINARY};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

/// Why an entry was left out of the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Did not match the include patterns, or matched an exclude pattern
    PatternMismatch,
    /// Not a regular file (link, device, socket)
    NotRegularFile,
    /// Content cannot be read
    NotReadable,
    /// Larger than the configured limit
    TooLarge { size: u64, limit: u64 },
    /// MIME type the consumer cannot index
    UnsupportedMimeType { mime: String },
}

impl RejectReason {
    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::PatternMismatch => "pattern_mismatch",
            Self::NotRegularFile => "not_regular_file",
            Self::NotReadable => "not_readable",
            Self::TooLarge { .. } => "too_large",
            Self::UnsupportedMimeType { .. } => "unsupported_mime_type",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PatternMismatch => write!(f, "excluded by pattern"),
            Self::NotRegularFile => write!(f, "not a regular file"),
            Self::NotReadable => write!(f, "not readable"),
            Self::TooLarge { size, limit } => write!(
                f,
                "size {} exceeds limit {}",
                format_size(*size, BINARY),
                format_size(*limit, BINARY)
            ),
            Self::UnsupportedMimeType { mime } => write!(f, "unsupported MIME type {}", mime),
        }
    }
}

/// Receives rejected entries
pub trait RejectionSink: Send + Sync {
    /// Record that `path` was rejected
    fn reject(&self, path: &str, reason: &RejectReason);
}

/// Logs rejections at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRejectionSink;

impl RejectionSink for LoggingRejectionSink {
    fn reject(&self, path: &str, reason: &RejectReason) {
        tracing::debug!(code = reason.code(), "Rejected {}: {}", path, reason);
    }
}

/// Keeps every rejection in memory
#[derive(Debug, Default)]
pub struct CollectingRejectionSink {
    rejected: Mutex<Vec<(String, RejectReason)>>,
}

impl CollectingRejectionSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what has been rejected so far
    pub fn rejected(&self) -> Vec<(String, RejectReason)> {
        self.rejected.lock().clone()
    }
}

impl RejectionSink for CollectingRejectionSink {
    fn reject(&self, path: &str, reason: &RejectReason) {
        self.rejected.lock().push((path.to_string(), reason.clone()));
    }
}

/// Include/exclude glob matcher
///
/// Files must match at least one include pattern (when any are given) and
/// no exclude pattern. Directories are only subject to the exclude
/// patterns, matched both as `path` and as `path/`, so `**/build/**`
/// prunes the whole `build` subtree.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    include: GlobSet,
    exclude: GlobSet,
    has_include: bool,
}

impl PatternFilter {
    /// Build from pattern lists
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
            has_include: !include.is_empty(),
        })
    }

    /// A filter accepting everything
    pub fn accept_all() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
            has_include: false,
        }
    }

    /// Whether a file path passes
    pub fn accepts_file(&self, path: &str) -> bool {
        if self.exclude.is_match(path) {
            return false;
        }
        !self.has_include || self.include.is_match(path)
    }

    /// Whether a directory path passes
    pub fn accepts_directory(&self, path: &str) -> bool {
        !(self.exclude.is_match(path) || self.exclude.is_match(format!("{}/", path)))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            SnapWatchError::config(format!("Invalid glob pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SnapWatchError::config(format!("Failed to build glob set: {}", e)))
}

/// Decide whether a file may enter a snapshot at all.
///
/// Returns the rejection reason, or `None` when the file is eligible.
/// Entries that vanish while being inspected come back as `NotReadable`.
pub fn check_file_eligibility(
    file: &dyn FileInfo,
    patterns: &PatternFilter,
) -> Result<Option<RejectReason>> {
    if !patterns.accepts_file(file.path()) {
        return Ok(Some(RejectReason::PatternMismatch));
    }
    match file.is_regular_file() {
        Ok(true) => {}
        Ok(false) => return Ok(Some(RejectReason::NotRegularFile)),
        Err(e) if e.is_not_visible() || e.is_entry_fault() => {
            return Ok(Some(RejectReason::NotReadable))
        }
        Err(e) => return Err(e),
    }
    match file.can_read() {
        Ok(true) => Ok(None),
        Ok(false) => Ok(Some(RejectReason::NotReadable)),
        Err(e) if e.is_not_visible() || e.is_entry_fault() => Ok(Some(RejectReason::NotReadable)),
        Err(e) => Err(e),
    }
}

/// How well the consumer handles a MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeSupport {
    Unsupported,
    Supported,
    Preferred,
}

/// Size and content-type policy of the consumer
pub trait ContentOracle: Send + Sync {
    /// Largest file the consumer accepts
    fn max_size(&self) -> Option<u64>;

    /// MIME type guess and support level for a path
    fn mime_support(&self, path: &str) -> (String, MimeSupport);

    /// Check one file against the policy
    fn check(&self, file: &dyn FileInfo) -> Result<Option<RejectReason>> {
        if let Some(limit) = self.max_size() {
            let size = file.length()?;
            if size > limit {
                return Ok(Some(RejectReason::TooLarge { size, limit }));
            }
        }
        let (mime, support) = self.mime_support(file.path());
        if support == MimeSupport::Unsupported {
            return Ok(Some(RejectReason::UnsupportedMimeType { mime }));
        }
        Ok(None)
    }
}

/// Extension-based oracle built on `mime_guess`
#[derive(Debug, Clone)]
pub struct MimeGuessOracle {
    max_size: Option<u64>,
    check_mime: bool,
}

impl MimeGuessOracle {
    /// Create an oracle; with `check_mime` off every type is `Supported`
    pub fn new(max_size: Option<u64>, check_mime: bool) -> Self {
        Self {
            max_size,
            check_mime,
        }
    }

    fn classify(mime: &str) -> MimeSupport {
        let (top, sub) = mime.split_once('/').unwrap_or((mime, ""));
        match top {
            "text" => MimeSupport::Preferred,
            "image" | "audio" | "video" | "font" => MimeSupport::Unsupported,
            "application" => match sub {
                "pdf" | "json" | "xml" | "rtf" | "msword" | "vnd.ms-excel"
                | "vnd.ms-powerpoint" => MimeSupport::Supported,
                s if s.starts_with("vnd.openxmlformats-officedocument")
                    || s.starts_with("vnd.oasis.opendocument") =>
                {
                    MimeSupport::Supported
                }
                "octet-stream" | "zip" | "gzip" | "x-tar" | "x-7z-compressed"
                | "x-msdownload" | "x-executable" | "java-archive" => MimeSupport::Unsupported,
                _ => MimeSupport::Supported,
            },
            _ => MimeSupport::Supported,
        }
    }
}

impl ContentOracle for MimeGuessOracle {
    fn max_size(&self) -> Option<u64> {
        self.max_size
    }

    fn mime_support(&self, path: &str) -> (String, MimeSupport) {
        let Some(mime) = mime_guess::from_path(path).first() else {
            return ("application/unknown".to_string(), MimeSupport::Supported);
        };
        let mime = mime.essence_str().to_string();
        if !self.check_mime {
            return (mime, MimeSupport::Supported);
        }
        let support = Self::classify(&mime);
        (mime, support)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::access::LocalFile;
    use std::io::Write;
    use tempfile::TempDir;

    fn patterns(include: &[&str], exclude: &[&str]) -> PatternFilter {
        let inc: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exc: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        PatternFilter::new(&inc, &exc).unwrap()
    }

    #[test]
    fn test_include_and_exclude() {
        let filter = patterns(&["**/*.txt"], &["**/secret*"]);
        assert!(filter.accepts_file("/data/a.txt"));
        assert!(!filter.accepts_file("/data/a.bin"));
        assert!(!filter.accepts_file("/data/secret.txt"));
        // includes do not apply to directories
        assert!(filter.accepts_directory("/data/docs"));
    }

    #[test]
    fn test_directory_exclusion_prunes_subtree() {
        let filter = patterns(&[], &["**/node_modules/**"]);
        assert!(!filter.accepts_directory("/src/node_modules"));
        assert!(!filter.accepts_file("/src/node_modules/x.js"));
        assert!(filter.accepts_directory("/src/lib"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = PatternFilter::new(&["[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, SnapWatchError::ConfigError(_)));
    }

    #[test]
    fn test_eligibility() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        std::fs::File::create(dir.path().join("a.txt")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let all = PatternFilter::accept_all();
        let file = LocalFile::new(format!("{}/a.txt", root));
        assert_eq!(check_file_eligibility(&file, &all).unwrap(), None);

        let only_md = patterns(&["**/*.md"], &[]);
        assert_eq!(
            check_file_eligibility(&file, &only_md).unwrap(),
            Some(RejectReason::PatternMismatch)
        );

        let sub = LocalFile::new(format!("{}/sub", root));
        assert_eq!(
            check_file_eligibility(&sub, &all).unwrap(),
            Some(RejectReason::NotRegularFile)
        );
    }

    #[test]
    fn test_mime_oracle() {
        let oracle = MimeGuessOracle::new(None, true);
        assert_eq!(oracle.mime_support("/a/readme.txt").1, MimeSupport::Preferred);
        assert_eq!(oracle.mime_support("/a/report.pdf").1, MimeSupport::Supported);
        assert_eq!(oracle.mime_support("/a/photo.png").1, MimeSupport::Unsupported);
        assert_eq!(oracle.mime_support("/a/no_extension").1, MimeSupport::Supported);

        let lenient = MimeGuessOracle::new(None, false);
        assert_eq!(lenient.mime_support("/a/photo.png").1, MimeSupport::Supported);
    }

    #[test]
    fn test_size_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::File::create(&path).unwrap().write_all(&[b'x'; 64]).unwrap();
        let file = LocalFile::new(path.to_str().unwrap().to_string());

        let oracle = MimeGuessOracle::new(Some(16), false);
        assert_eq!(
            oracle.check(&file).unwrap(),
            Some(RejectReason::TooLarge { size: 64, limit: 16 })
        );
        assert_eq!(MimeGuessOracle::new(Some(64), false).check(&file).unwrap(), None);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingRejectionSink::new();
        sink.reject("/a", &RejectReason::NotReadable);
        assert_eq!(sink.rejected(), vec![("/a".to_string(), RejectReason::NotReadable)]);
        assert_eq!(RejectReason::NotReadable.code(), "not_readable");
    }
}
