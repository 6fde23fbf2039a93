//! Content checksum module
//!
//! Provides streaming XXHash3, XXHash64, BLAKE3, and SHA-256 digests and
//! the [`ChecksumGenerator`] the monitor uses for file records.

mod integrity;

pub use integrity::*;
