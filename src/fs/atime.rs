//! Access-time preserving file wrapper
//!
//! Reading a file to checksum it bumps its access time, which some
//! archiving tools use to decide what is stale. [`AccessTimePreserving`]
//! remembers the access time before the content is opened and puts it
//! back once the reader is dropped. It works for any transport whose
//! paths are host paths (local disk, mounted shares).

use crate::error::Result;
use crate::fs::access::FileInfo;
use crate::fs::acl::Acl;
use filetime::FileTime;
use std::fmt;
use std::io::Read;

/// Wraps a [`FileInfo`] so content reads leave the access time untouched
pub struct AccessTimePreserving {
    inner: Box<dyn FileInfo>,
}

impl AccessTimePreserving {
    /// Wrap `inner`
    pub fn wrap(inner: Box<dyn FileInfo>) -> Box<dyn FileInfo> {
        Box::new(Self { inner })
    }
}

impl fmt::Debug for AccessTimePreserving {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessTimePreserving").field(&self.inner).finish()
    }
}

impl FileInfo for AccessTimePreserving {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn file_system_type(&self) -> &str {
        self.inner.file_system_type()
    }

    fn is_directory(&self) -> Result<bool> {
        self.inner.is_directory()
    }

    fn is_regular_file(&self) -> Result<bool> {
        self.inner.is_regular_file()
    }

    fn exists(&self) -> Result<bool> {
        self.inner.exists()
    }

    fn can_read(&self) -> Result<bool> {
        self.inner.can_read()
    }

    fn length(&self) -> Result<u64> {
        self.inner.length()
    }

    fn last_modified(&self) -> Result<i64> {
        self.inner.last_modified()
    }

    fn list_children(&self) -> Result<Vec<Box<dyn FileInfo>>> {
        Ok(self
            .inner
            .list_children()?
            .into_iter()
            .map(AccessTimePreserving::wrap)
            .collect())
    }

    fn acl(&self) -> Result<Acl> {
        self.inner.acl()
    }

    fn open_content(&self) -> Result<Box<dyn Read + Send>> {
        let saved = std::fs::metadata(self.path())
            .ok()
            .map(|m| FileTime::from_last_access_time(&m));
        let reader = self.inner.open_content()?;
        match saved {
            Some(atime) => Ok(Box::new(RestoreOnDrop {
                reader,
                path: self.path().to_string(),
                atime,
            })),
            None => Ok(reader),
        }
    }
}

struct RestoreOnDrop {
    reader: Box<dyn Read + Send>,
    path: String,
    atime: FileTime,
}

impl Read for RestoreOnDrop {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        if let Err(e) = filetime::set_file_atime(&self.path, self.atime) {
            tracing::debug!("Could not restore access time on {}: {}", self.path, e);
        }
    }
}
