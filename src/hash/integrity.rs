//! Content checksums using multiple hash algorithms
//!
//! Supports XXHash3 (ultra-fast), XXHash64, BLAKE3 (fast + secure), and
//! SHA-256. Checksums are computed by streaming a file's content through a
//! [`Hasher`]; the monitor only asks for one when cheaper metadata cannot
//! rule out a content change.

use crate::config::HashAlgorithm;
use crate::error::{Result, SnapWatchError};
use crate::fs::FileInfo;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Hash result as hex string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashResult {
    /// The hash algorithm used
    pub algorithm: HashAlgorithm,
    /// Hash value as lowercase hex string
    pub hash: String,
    /// Bytes hashed
    pub size: u64,
}

impl HashResult {
    /// Create a new hash result
    pub fn new(algorithm: HashAlgorithm, hash: String, size: u64) -> Self {
        Self {
            algorithm,
            hash,
            size,
        }
    }
}

impl std::fmt::Display for HashResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// Unified hasher that supports all algorithms
pub enum Hasher {
    /// XXHash3 128-bit
    XXHash3(xxhash_rust::xxh3::Xxh3),
    /// XXHash64
    XXHash64(xxhash_rust::xxh64::Xxh64),
    /// BLAKE3
    Blake3(blake3::Hasher),
    /// SHA-256
    Sha256(sha2::Sha256),
}

impl Hasher {
    /// Create a new hasher for the given algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::XXHash3 => Self::XXHash3(xxhash_rust::xxh3::Xxh3::new()),
            HashAlgorithm::XXHash64 => Self::XXHash64(xxhash_rust::xxh64::Xxh64::new(0)),
            HashAlgorithm::Blake3 => Self::Blake3(blake3::Hasher::new()),
            HashAlgorithm::Sha256 => {
                use sha2::Digest;
                Self::Sha256(sha2::Sha256::new())
            }
        }
    }

    /// Get the algorithm this hasher uses
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::XXHash3(_) => HashAlgorithm::XXHash3,
            Self::XXHash64(_) => HashAlgorithm::XXHash64,
            Self::Blake3(_) => HashAlgorithm::Blake3,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::XXHash3(h) => h.update(data),
            Self::XXHash64(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
            Self::Sha256(h) => {
                use sha2::Digest;
                h.update(data);
            }
        }
    }

    /// Finalize and get the hash as hex string
    pub fn finalize(self) -> String {
        match self {
            Self::XXHash3(h) => format!("{:032x}", h.digest128()),
            Self::XXHash64(h) => format!("{:016x}", h.digest()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
            Self::Sha256(h) => {
                use sha2::Digest;
                hex::encode(h.finalize())
            }
        }
    }
}

/// Compute hash of data in memory
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> HashResult {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    HashResult::new(algorithm, hasher.finalize(), data.len() as u64)
}

/// Stream `reader` to the end through a hasher
pub fn hash_reader<R: Read + ?Sized>(
    reader: &mut R,
    algorithm: HashAlgorithm,
    buffer_size: usize,
) -> std::io::Result<HashResult> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; buffer_size];
    let mut size = 0u64;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(HashResult::new(algorithm, hasher.finalize(), size))
}

/// Computes the content checksum stored in file records
pub trait ChecksumGenerator: Send + Sync {
    /// Checksum of the file's current content
    fn checksum(&self, file: &dyn FileInfo) -> Result<String>;
}

/// Checksum generator streaming content through a [`Hasher`]
#[derive(Debug, Clone)]
pub struct DigestChecksum {
    algorithm: HashAlgorithm,
    buffer_size: usize,
}

impl DigestChecksum {
    /// Create a generator for `algorithm` with a 1MB read buffer
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            buffer_size: 1024 * 1024,
        }
    }

    /// Override the read buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(4096);
        self
    }

    /// Algorithm in use
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

impl Default for DigestChecksum {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl ChecksumGenerator for DigestChecksum {
    fn checksum(&self, file: &dyn FileInfo) -> Result<String> {
        let mut reader = file.open_content()?;
        let result = hash_reader(reader.as_mut(), self.algorithm, self.buffer_size)
            .map_err(|e| SnapWatchError::from_repository(file.path(), e))?;
        tracing::trace!(
            "{} {} over {} bytes of {}",
            self.algorithm.name(),
            result.hash,
            result.size,
            file.path()
        );
        Ok(result.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFile;
    use tempfile::TempDir;

    #[test]
    fn test_hash_algorithms() {
        let data = b"Hello, World!";

        for algorithm in [
            HashAlgorithm::XXHash3,
            HashAlgorithm::XXHash64,
            HashAlgorithm::Blake3,
            HashAlgorithm::Sha256,
        ] {
            let hash = hash_bytes(data, algorithm);
            assert_eq!(hash.hash.len(), algorithm.output_size() * 2);
            assert_eq!(hash.size, data.len() as u64);

            // Verify determinism
            let hash2 = hash_bytes(data, algorithm);
            assert_eq!(hash, hash2);
        }
    }

    #[test]
    fn test_streaming_matches_in_memory() {
        let data = vec![7u8; 10_000];
        let streamed =
            hash_reader(&mut std::io::Cursor::new(&data), HashAlgorithm::Blake3, 4096).unwrap();
        assert_eq!(streamed, hash_bytes(&data, HashAlgorithm::Blake3));
    }

    #[test]
    fn test_digest_checksum_of_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, b"Test file content for hashing").unwrap();
        let file = LocalFile::new(path.to_str().unwrap().to_string());

        let generator = DigestChecksum::new(HashAlgorithm::Sha256);
        let checksum = generator.checksum(&file).unwrap();
        assert_eq!(
            checksum,
            hash_bytes(b"Test file content for hashing", HashAlgorithm::Sha256).hash
        );

        std::fs::write(&path, b"changed").unwrap();
        let file = LocalFile::new(path.to_str().unwrap().to_string());
        assert_ne!(generator.checksum(&file).unwrap(), checksum);
    }

    #[test]
    fn test_checksum_of_missing_file() {
        let dir = TempDir::new().unwrap();
        let file = LocalFile::new(format!("{}/gone", dir.path().to_str().unwrap()));
        let err = DigestChecksum::default().checksum(&file).unwrap_err();
        assert!(err.is_not_visible());
    }
}
