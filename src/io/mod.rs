//! Random-access byte sources for executable parsing.
//!
//! Parsers never hold a whole file in memory on their own account; they ask a
//! [`ByteSource`] for the ranges they need. Two sources are provided: plain
//! in-memory [`Bytes`] and [`MappedFile`], which memory-maps a file on disk
//! and enforces [`IOLimits`] so hostile inputs cannot exhaust memory.

pub mod error;

use crate::io::error::{IoError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Defines the resource limits for I/O operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
    /// The maximum total number of bytes that can be read from the file across all operations.
    pub max_read_bytes: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024,  // 512MB
            max_read_bytes: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// Random-access view over the bytes of an executable.
///
/// Reads that extend past the end of the source are clipped; a read starting
/// at or beyond the end returns an empty buffer.
pub trait ByteSource {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Read up to `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes>;
}

impl ByteSource for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        let total = self.len() as u64;
        if offset >= total {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(len).min(total);
        Ok(self.slice(offset as usize..end as usize))
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        (**self).read_at(offset, len)
    }
}

/// A bounded, memory-mapped file.
///
/// The read budget is tracked with a `Cell`, so a `MappedFile` is usable
/// through a shared reference but is not `Sync`.
pub struct MappedFile {
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
    limits: IOLimits,
    bytes_read: Cell<u64>,
    file_size: u64,
}

impl MappedFile {
    /// Opens and memory-maps a file.
    ///
    /// Fails if the file size exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening file for mapped reading"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: read-only map of a regular file; we never hand out
            // references into the map, only copies.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            limits,
            bytes_read: Cell::new(0),
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the total number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.get()
    }

    pub fn limits(&self) -> &IOLimits {
        &self.limits
    }
}

impl ByteSource for MappedFile {
    fn size(&self) -> u64 {
        self.file_size
    }

    /// Copies a clipped range out of the map.
    ///
    /// # Errors
    ///
    /// Returns `IoError::ReadLimitExceeded` if the clipped read would push the
    /// running total past `limits.max_read_bytes`.
    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        let map = match &self.mmap {
            Some(m) => m,
            None => return Ok(Bytes::new()),
        };

        let total = map.len() as u64;
        if offset >= total {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(len).min(total);
        let actual_len = end - offset;

        let current = self.bytes_read.get();
        if current.saturating_add(actual_len) > self.limits.max_read_bytes {
            warn!(
                path = %self.path.display(),
                current_read = current,
                requested = actual_len,
                limit = self.limits.max_read_bytes,
                "Read limit exceeded"
            );
            return Err(IoError::ReadLimitExceeded {
                limit: self.limits.max_read_bytes,
                current,
            });
        }

        let out = Bytes::copy_from_slice(&map[offset as usize..end as usize]);
        self.bytes_read.set(current + actual_len);

        trace!(
            path = %self.path.display(),
            offset = offset,
            len = actual_len,
            total_read = current + actual_len,
            "Performed read"
        );

        Ok(out)
    }
}
