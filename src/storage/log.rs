//! Memory-mapped log file
//!
//! The log is a pre-allocated, append-only byte region backed by a shared
//! read-write memory mapping. It tracks a *logical* size (the number of
//! valid bytes) separately from the physical file size: the file is
//! extended to `max_bytes` up front so appends are plain memcpys into the
//! mapping, and truncated back down to the logical size on close.
//!
//! Invariants:
//! - no valid batch ever crosses the logical size;
//! - bytes in `[logical_size, physical_size)` are reserved zero padding and
//!   are never served as data.
//!
//! A single read-write lock guards the logical size: appends hold it
//! exclusively, reads share it. Read results are materialized into [`Bytes`]
//! while the lock is held, so a concurrent `close` (which takes the write
//! lock) can never unmap the region under a reader.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;

use crate::error::{Result, StreamlogError};
use crate::storage::record::BATCH_OVERHEAD;

/// Append-only memory-mapped byte region with logical-size tracking
pub struct Log {
    path: PathBuf,
    inner: RwLock<LogInner>,
}

struct LogInner {
    file: Option<File>,
    mmap: Option<MmapMut>,
    /// Valid byte count; everything beyond is pre-allocated padding.
    size: usize,
}

impl Log {
    /// Open or create a log file, pre-allocating it to `max_bytes`.
    ///
    /// The logical size starts at zero; segment recovery establishes it.
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if file.metadata()?.len() < max_bytes {
            file.set_len(max_bytes)?;
        }

        // SAFETY: the mapping is private to this struct and the file is never
        // truncated below the mapped range while the mapping is alive.
        let mmap = unsafe { MmapOptions::new().len(max_bytes as usize).map_mut(&file)? };

        Ok(Self {
            path,
            inner: RwLock::new(LogInner {
                file: Some(file),
                mmap: Some(mmap),
                size: 0,
            }),
        })
    }

    /// Append raw bytes, returning `(bytes_written, position)`.
    ///
    /// Fails with [`StreamlogError::SegmentFull`] when the batch does not fit
    /// in the remaining mapped region.
    pub fn append(&self, bytes: &[u8]) -> Result<(usize, u64)> {
        let mut inner = self.inner.write();
        let size = inner.size;
        let mmap = inner
            .mmap
            .as_mut()
            .ok_or_else(|| StreamlogError::Storage("log is closed".to_string()))?;

        if size + bytes.len() > mmap.len() {
            return Err(StreamlogError::SegmentFull);
        }

        mmap[size..size + bytes.len()].copy_from_slice(bytes);
        inner.size = size + bytes.len();

        Ok((bytes.len(), size as u64))
    }

    /// Read a run of whole batches starting at `pos`, up to `max_bytes`.
    ///
    /// Walks batch framing (`BatchLength` at `pos + 8`) and accumulates
    /// complete batches. If even the first batch exceeds `max_bytes` it is
    /// returned alone so the caller always makes progress. Returns `None`
    /// when `pos` is at or past the logical size or no complete batch fits.
    pub fn read_at(&self, pos: u64, max_bytes: i32) -> Option<Bytes> {
        let inner = self.inner.read();
        let mmap = inner.mmap.as_ref()?;
        let size = inner.size as u64;

        if pos >= size {
            return None;
        }

        let limit = max_bytes.max(0) as u64;
        let mut current = pos;
        let mut total: u64 = 0;

        while current < size {
            if size - current < BATCH_OVERHEAD as u64 {
                break;
            }

            let len_at = (current + 8) as usize;
            let batch_len = u32::from_be_bytes([
                mmap[len_at],
                mmap[len_at + 1],
                mmap[len_at + 2],
                mmap[len_at + 3],
            ]);
            let batch_size = BATCH_OVERHEAD as u64 + u64::from(batch_len);

            if current + batch_size > size {
                break;
            }

            if total + batch_size > limit {
                if total == 0 {
                    total = batch_size;
                }
                break;
            }

            total += batch_size;
            current += batch_size;
        }

        if total == 0 {
            return None;
        }

        Some(Bytes::copy_from_slice(
            &mmap[pos as usize..(pos + total) as usize],
        ))
    }

    /// Bounds-checked raw read of exactly `len` bytes at `pos`.
    ///
    /// Returns `None` when the range extends past the logical size.
    pub fn read_raw(&self, pos: u64, len: usize) -> Option<Bytes> {
        let inner = self.inner.read();
        let mmap = inner.mmap.as_ref()?;

        let start = pos as usize;
        let end = start.checked_add(len)?;
        if end > inner.size {
            return None;
        }

        Some(Bytes::copy_from_slice(&mmap[start..end]))
    }

    /// Current logical size in bytes
    pub fn size(&self) -> u64 {
        self.inner.read().size as u64
    }

    /// Set the logical size directly. Recovery-only mutator.
    pub fn set_size(&self, size: u64) {
        let mut inner = self.inner.write();
        let mapped = inner.mmap.as_ref().map_or(0, |m| m.len());
        inner.size = (size as usize).min(mapped);
    }

    /// Length of the mapped region (the pre-allocated physical upper bound)
    pub fn mapped_len(&self) -> u64 {
        self.inner.read().mmap.as_ref().map_or(0, |m| m.len()) as u64
    }

    /// Flush the mapping, unmap, and truncate the file to the logical size.
    ///
    /// Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();

        if let Some(mmap) = inner.mmap.take() {
            mmap.flush()?;
            drop(mmap);
        }

        let size = inner.size as u64;
        if let Some(file) = inner.file.take() {
            file.set_len(size)?;
        }

        Ok(())
    }

    /// Unmap, close, and unlink the file. No truncation needed.
    pub fn delete(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.mmap.take();
        inner.file.take();

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
