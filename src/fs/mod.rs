//! File system access module
//!
//! Provides the transport-neutral [`FileInfo`] abstraction the monitor
//! walks, the local-disk transport, access-list aggregation and the
//! include/exclude and content filters.

pub mod access;
pub mod acl;
pub mod atime;
pub mod filter;

pub use access::{
    join_path, list_directory, normalize_start_path, DirectoryListing, FileInfo, FileSystemType,
    ListingFailure, LocalFile, LocalFileSystem, SEPARATOR,
};
pub use acl::{Ace, AceFlags, AceType, AccessMask, Acl, AclAggregator, Principal, SidType};
pub use atime::AccessTimePreserving;
pub use filter::{
    check_file_eligibility, CollectingRejectionSink, ContentOracle, LoggingRejectionSink,
    MimeGuessOracle, MimeSupport, PatternFilter, RejectReason, RejectionSink,
};
