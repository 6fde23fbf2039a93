//! Read-only file access layer
//!
//! The diff engine never touches `std::fs` for the monitored tree; it goes
//! through [`FileInfo`] so that a network share and a local disk look the
//! same. Each transport implements the trait once. This module ships the
//! local-disk transport.
//!
//! Failures are reported in four flavours the engine treats differently:
//! [`SnapWatchError::NotFound`] and [`SnapWatchError::PermissionDenied`]
//! mean "this entry is gone or invisible", [`SnapWatchError::EntryIo`] is a
//! local fault that skips one entry, while
//! [`SnapWatchError::RepositoryUnavailable`] is retryable and aborts the pass.

use crate::config::SecurityPolicy;
use crate::error::{Result, SnapWatchError};
use crate::fs::acl::{AccessMask, Ace, Acl, AclAggregator, Principal, SidType};
use crate::fs::atime::AccessTimePreserving;
use crate::fs::filter::PatternFilter;
use crate::sync::compare_paths;
use std::fmt;
use std::fs::Metadata;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Path separator used in record paths for every transport
pub const SEPARATOR: char = '/';

/// One file or directory reachable through some transport
pub trait FileInfo: Send + Sync + fmt::Debug {
    /// Full path in `/`-separated form
    fn path(&self) -> &str;

    /// Transport name recorded in snapshots (e.g. `local`)
    fn file_system_type(&self) -> &str;

    /// Is this a directory
    fn is_directory(&self) -> Result<bool>;

    /// Is this a regular file (not a link, device or socket)
    fn is_regular_file(&self) -> Result<bool>;

    /// Does this entry exist
    fn exists(&self) -> Result<bool>;

    /// Can the content (or listing) be read
    fn can_read(&self) -> Result<bool>;

    /// Size in bytes
    fn length(&self) -> Result<u64>;

    /// Modification time in milliseconds since the epoch
    fn last_modified(&self) -> Result<i64>;

    /// Children in no particular order
    fn list_children(&self) -> Result<Vec<Box<dyn FileInfo>>>;

    /// Aggregated access list; indeterminate rather than an error when
    /// security cannot be read
    fn acl(&self) -> Result<Acl>;

    /// Stream the file content
    fn open_content(&self) -> Result<Box<dyn Read + Send>>;

    /// Whether this entry passes the include/exclude patterns
    fn matches_pattern(&self, filter: &PatternFilter) -> bool {
        match self.is_directory() {
            Ok(true) => filter.accepts_directory(self.path()),
            _ => filter.accepts_file(self.path()),
        }
    }
}

/// Creates [`FileInfo`] roots for one transport
pub trait FileSystemType: Send + Sync {
    /// Transport name
    fn name(&self) -> &str;

    /// Whether this transport understands `path`
    fn is_path(&self, path: &str) -> bool;

    /// Open the entry at `path`
    fn get_file(&self, path: &str) -> Result<Box<dyn FileInfo>>;
}

/// Why a directory could not be listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingFailure {
    /// The directory vanished
    NotFound,
    /// We may not list it
    AccessDenied,
    /// Some other local I/O problem
    Io(String),
}

impl fmt::Display for ListingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::AccessDenied => write!(f, "access denied"),
            Self::Io(message) => write!(f, "I/O error: {}", message),
        }
    }
}

/// Outcome of listing one directory during a pass
#[derive(Debug)]
pub enum DirectoryListing {
    /// Children in snapshot order
    Listed(Vec<Box<dyn FileInfo>>),
    /// Listing failed; the directory counts as empty for this pass
    Failed(ListingFailure),
}

impl DirectoryListing {
    /// Children, empty on failure
    pub fn into_children(self) -> Vec<Box<dyn FileInfo>> {
        match self {
            Self::Listed(children) => children,
            Self::Failed(_) => Vec::new(),
        }
    }
}

/// List `dir` and sort the children into snapshot order.
///
/// Only a retryable repository fault is returned as `Err`; every other
/// failure becomes [`DirectoryListing::Failed`]. Children that vanish
/// between listing and stat are dropped.
pub fn list_directory(dir: &dyn FileInfo) -> Result<DirectoryListing> {
    let children = match dir.list_children() {
        Ok(children) => children,
        Err(err) => return classify_listing_error(err),
    };

    let mut keyed = Vec::with_capacity(children.len());
    for child in children {
        match child.is_directory() {
            Ok(is_dir) => keyed.push((is_dir, child)),
            Err(err) if err.is_not_visible() => {
                tracing::debug!("Skipping vanished entry {}", child.path());
            }
            Err(err) if err.is_entry_fault() => {
                tracing::warn!("Skipping {}: {}", child.path(), err);
            }
            Err(err) => return Err(err),
        }
    }

    keyed.sort_by(|(a_dir, a), (b_dir, b)| compare_paths(a.path(), *a_dir, b.path(), *b_dir));
    Ok(DirectoryListing::Listed(
        keyed.into_iter().map(|(_, child)| child).collect(),
    ))
}

fn classify_listing_error(err: SnapWatchError) -> Result<DirectoryListing> {
    match err.root() {
        SnapWatchError::NotFound(_) => Ok(DirectoryListing::Failed(ListingFailure::NotFound)),
        SnapWatchError::PermissionDenied(_) => {
            Ok(DirectoryListing::Failed(ListingFailure::AccessDenied))
        }
        SnapWatchError::RepositoryUnavailable { .. } => Err(err),
        other => Ok(DirectoryListing::Failed(ListingFailure::Io(other.to_string()))),
    }
}

/// Join a child name onto a `/`-separated parent path
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with(SEPARATOR) {
        format!("{}{}", parent, name)
    } else {
        format!("{}{}{}", parent, SEPARATOR, name)
    }
}

/// Strip trailing separators, keeping a bare root intact
pub fn normalize_start_path(path: &str) -> String {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() && path.starts_with(SEPARATOR) {
        SEPARATOR.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Local disk transport
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    aggregator: Arc<AclAggregator>,
    preserve_access_time: bool,
}

impl LocalFileSystem {
    /// Transport name recorded in snapshots
    pub const NAME: &'static str = "local";

    /// Create the transport with the default security policy
    pub fn new() -> Self {
        Self::with_aggregator(AclAggregator::new(SecurityPolicy::default()))
    }

    /// Create the transport with a configured ACL aggregator
    pub fn with_aggregator(aggregator: AclAggregator) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
            preserve_access_time: false,
        }
    }

    /// Restore access times after content reads
    pub fn preserving_access_time(mut self, preserve: bool) -> Self {
        self.preserve_access_time = preserve;
        self
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemType for LocalFileSystem {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_path(&self, path: &str) -> bool {
        Path::new(path).is_absolute()
    }

    fn get_file(&self, path: &str) -> Result<Box<dyn FileInfo>> {
        if !self.is_path(path) {
            return Err(SnapWatchError::config(format!(
                "local start path must be absolute: {}",
                path
            )));
        }
        let root: Box<dyn FileInfo> = Box::new(LocalFile::with_aggregator(
            normalize_start_path(path),
            self.aggregator.clone(),
        ));
        if self.preserve_access_time {
            Ok(AccessTimePreserving::wrap(root))
        } else {
            Ok(root)
        }
    }
}

/// A file or directory on local disk
///
/// Metadata is read once, without following symbolic links, so a link is
/// neither a directory nor a regular file.
pub struct LocalFile {
    path: String,
    metadata: std::result::Result<Metadata, (ErrorKind, String)>,
    aggregator: Arc<AclAggregator>,
}

impl LocalFile {
    /// Stat `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_aggregator(path, Arc::new(AclAggregator::new(SecurityPolicy::default())))
    }

    /// Stat `path`, rendering its ACL with `aggregator`
    pub fn with_aggregator(path: impl Into<String>, aggregator: Arc<AclAggregator>) -> Self {
        let path = path.into();
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| (e.kind(), e.to_string()));
        Self {
            path,
            metadata,
            aggregator,
        }
    }

    fn metadata(&self) -> Result<&Metadata> {
        self.metadata.as_ref().map_err(|(kind, message)| {
            SnapWatchError::from_repository(&self.path, std::io::Error::new(*kind, message.clone()))
        })
    }

    fn os_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFile").field("path", &self.path).finish()
    }
}

impl FileInfo for LocalFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_system_type(&self) -> &str {
        LocalFileSystem::NAME
    }

    fn is_directory(&self) -> Result<bool> {
        Ok(self.metadata()?.is_dir())
    }

    fn is_regular_file(&self) -> Result<bool> {
        Ok(self.metadata()?.is_file())
    }

    fn exists(&self) -> Result<bool> {
        match &self.metadata {
            Ok(_) => Ok(true),
            Err((ErrorKind::NotFound, _)) => Ok(false),
            Err(_) => self.metadata().map(|_| true),
        }
    }

    fn can_read(&self) -> Result<bool> {
        let metadata = self.metadata()?;
        let attempt = if metadata.is_dir() {
            std::fs::read_dir(self.os_path()).map(|_| ())
        } else {
            std::fs::File::open(self.os_path()).map(|_| ())
        };
        match attempt {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Ok(false),
            Err(e) => Err(SnapWatchError::from_repository(&self.path, e)),
        }
    }

    fn length(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn last_modified(&self) -> Result<i64> {
        let modified = self
            .metadata()?
            .modified()
            .map_err(|e| SnapWatchError::from_repository(&self.path, e))?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0))
    }

    fn list_children(&self) -> Result<Vec<Box<dyn FileInfo>>> {
        let entries = std::fs::read_dir(self.os_path())
            .map_err(|e| SnapWatchError::from_repository(&self.path, e))?;

        let mut children: Vec<Box<dyn FileInfo>> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SnapWatchError::from_repository(&self.path, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                tracing::warn!("Skipping non-UTF-8 name under {}", self.path);
                continue;
            };
            children.push(Box::new(LocalFile::with_aggregator(
                join_path(&self.path, name),
                self.aggregator.clone(),
            )));
        }
        Ok(children)
    }

    #[cfg(unix)]
    fn acl(&self) -> Result<Acl> {
        use std::os::unix::fs::MetadataExt;

        let metadata = self.metadata()?;
        let file_aces = mode_aces(metadata.mode(), metadata.uid(), metadata.gid());
        // a local disk has no share level; it admits everyone
        let share_aces = [Ace::allow(Principal::everyone(), AccessMask::FULL_CONTROL)];
        Ok(self.aggregator.aggregate(&file_aces, &share_aces))
    }

    #[cfg(not(unix))]
    fn acl(&self) -> Result<Acl> {
        self.metadata()?;
        Ok(Acl::indeterminate())
    }

    fn open_content(&self) -> Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(self.os_path())
            .map_err(|e| SnapWatchError::from_repository(&self.path, e))?;
        Ok(Box::new(std::io::BufReader::with_capacity(1024 * 1024, file)))
    }
}

/// Read permission bits as allow entries. Unix ids map onto the
/// `S-1-22-1-<uid>` / `S-1-22-2-<gid>` SIDs Samba uses for them.
#[cfg(unix)]
fn mode_aces(mode: u32, uid: u32, gid: u32) -> Vec<Ace> {
    let mut aces = Vec::with_capacity(3);
    if mode & 0o400 != 0 {
        let owner = Principal::new(
            format!("uid:{}", uid),
            None,
            format!("S-1-22-1-{}", uid),
            SidType::User,
        );
        aces.push(Ace::allow(owner, AccessMask::FILE_READ_DATA));
    }
    if mode & 0o040 != 0 {
        let group = Principal::new(
            format!("gid:{}", gid),
            None,
            format!("S-1-22-2-{}", gid),
            SidType::Group,
        );
        aces.push(Ace::allow(group, AccessMask::FILE_READ_DATA));
    }
    if mode & 0o004 != 0 {
        aces.push(Ace::allow(Principal::everyone(), AccessMask::FILE_READ_DATA));
    }
    aces
}
