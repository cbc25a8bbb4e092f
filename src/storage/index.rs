//! Memory-mapped sparse offset index
//!
//! Each segment carries a `.index` file mapping relative offsets to log file
//! positions. Entries are 8 bytes, big-endian: `(rel_offset: u32, pos: u32)`,
//! packed densely from the start of the file. Both fields are strictly
//! increasing: the index covers a sparse subset of batch boundaries, with
//! the first batch always present.
//!
//! The index is non-authoritative: a lost or truncated index is rebuilt from
//! the log during segment recovery, so write failures here are never fatal
//! to an append.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;

use crate::error::{Result, StreamlogError};

/// Size of one index entry: rel_offset(4) + position(4)
pub const INDEX_ENTRY_SIZE: u64 = 8;

/// Memory-mapped sparse index of `(relative_offset, file_position)` pairs
pub struct OffsetIndex {
    path: PathBuf,
    inner: RwLock<IndexInner>,
}

struct IndexInner {
    file: Option<File>,
    mmap: Option<MmapMut>,
    /// Used bytes; always a multiple of the entry size.
    size: u64,
}

impl OffsetIndex {
    /// Open or create an index file, pre-allocating it to `max_bytes`.
    ///
    /// A cleanly closed index was truncated to its logical size, so a
    /// physical length below `max_bytes` recovers the stored entries as
    /// scan hints. A file still at its pre-allocated length was never
    /// closed; its contents are untrusted and the index restarts empty,
    /// to be rebuilt by segment recovery.
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let physical = file.metadata()?.len();
        let size = if physical < max_bytes {
            physical - physical % INDEX_ENTRY_SIZE
        } else {
            0
        };

        if physical < max_bytes {
            file.set_len(max_bytes)?;
        }

        // SAFETY: mapping is private to this struct; the file is not shrunk
        // below the mapped range while the mapping is alive.
        let mmap = unsafe { MmapOptions::new().len(max_bytes as usize).map_mut(&file)? };

        Ok(Self {
            path,
            inner: RwLock::new(IndexInner {
                file: Some(file),
                mmap: Some(mmap),
                size,
            }),
        })
    }

    /// Append an entry. Fails with [`StreamlogError::IndexFull`] when the
    /// mapped region has no room for another 8 bytes.
    pub fn write(&self, rel_offset: u32, pos: u32) -> Result<()> {
        let mut inner = self.inner.write();
        let size = inner.size as usize;
        let mmap = inner
            .mmap
            .as_mut()
            .ok_or_else(|| StreamlogError::Storage("index is closed".to_string()))?;

        if size + INDEX_ENTRY_SIZE as usize > mmap.len() {
            return Err(StreamlogError::IndexFull);
        }

        mmap[size..size + 4].copy_from_slice(&rel_offset.to_be_bytes());
        mmap[size + 4..size + 8].copy_from_slice(&pos.to_be_bytes());
        inner.size += INDEX_ENTRY_SIZE;

        Ok(())
    }

    /// Binary-search for the largest entry with `rel_offset <= target` and
    /// return its stored file position.
    ///
    /// Returns 0 on an empty index or when every entry is above the target,
    /// which is a valid position to start a forward scan from.
    pub fn lookup(&self, target: u32) -> u64 {
        let inner = self.inner.read();
        let Some(mmap) = inner.mmap.as_ref() else {
            return 0;
        };

        let entries = inner.size / INDEX_ENTRY_SIZE;
        if entries == 0 {
            return 0;
        }

        let mut found: Option<u32> = None;
        let mut low: i64 = 0;
        let mut high: i64 = entries as i64 - 1;

        while low <= high {
            let mid = (low + high) / 2;
            let at = (mid as u64 * INDEX_ENTRY_SIZE) as usize;
            let rel = u32::from_be_bytes([mmap[at], mmap[at + 1], mmap[at + 2], mmap[at + 3]]);
            let pos =
                u32::from_be_bytes([mmap[at + 4], mmap[at + 5], mmap[at + 6], mmap[at + 7]]);

            if rel <= target {
                found = Some(pos);
                low = mid + 1;
            } else {
                high = mid - 1;
            }
        }

        found.map_or(0, u64::from)
    }

    /// Last entry as `(rel_offset, pos)`, or `None` when empty.
    pub fn last_entry(&self) -> Option<(u32, u32)> {
        let inner = self.inner.read();
        let mmap = inner.mmap.as_ref()?;

        if inner.size == 0 {
            return None;
        }

        let at = (inner.size - INDEX_ENTRY_SIZE) as usize;
        let rel = u32::from_be_bytes([mmap[at], mmap[at + 1], mmap[at + 2], mmap[at + 3]]);
        let pos = u32::from_be_bytes([mmap[at + 4], mmap[at + 5], mmap[at + 6], mmap[at + 7]]);
        Some((rel, pos))
    }

    /// Number of entries currently stored
    pub fn entry_count(&self) -> u64 {
        self.inner.read().size / INDEX_ENTRY_SIZE
    }

    /// Set the logical size to `size` bytes (must not exceed the mapping).
    pub fn truncate(&self, size: u64) -> Result<()> {
        let mut inner = self.inner.write();
        let mapped = inner.mmap.as_ref().map_or(0, |m| m.len()) as u64;
        if size > mapped {
            return Err(StreamlogError::Storage(format!(
                "index truncate beyond mapping: {size} > {mapped}"
            )));
        }
        inner.size = size;
        Ok(())
    }

    /// Flush, unmap, and truncate the file to the logical size.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();

        if let Some(mmap) = inner.mmap.take() {
            mmap.flush()?;
            drop(mmap);
        }

        let size = inner.size;
        if let Some(file) = inner.file.take() {
            file.set_len(size)?;
        }

        Ok(())
    }

    /// Unmap, close, and unlink the file.
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lookup_empty_returns_zero() {
        let dir = tempdir().unwrap();
        let index = OffsetIndex::new(dir.path().join("a.index"), 1024).unwrap();

        assert_eq!(index.lookup(0), 0);
        assert_eq!(index.lookup(100), 0);
        assert_eq!(index.entry_count(), 0);
        assert!(index.last_entry().is_none());
    }

    #[test]
    fn test_lookup_finds_floor_entry() {
        let dir = tempdir().unwrap();
        let index = OffsetIndex::new(dir.path().join("a.index"), 1024).unwrap();

        index.write(0, 0).unwrap();
        index.write(10, 1000).unwrap();
        index.write(20, 2000).unwrap();
        index.write(30, 3000).unwrap();

        // Exact hits.
        assert_eq!(index.lookup(0), 0);
        assert_eq!(index.lookup(10), 1000);
        assert_eq!(index.lookup(30), 3000);

        // Between entries: largest entry at or below the target.
        assert_eq!(index.lookup(5), 0);
        assert_eq!(index.lookup(15), 1000);
        assert_eq!(index.lookup(29), 2000);

        // Beyond all entries.
        assert_eq!(index.lookup(1000), 3000);
    }

    #[test]
    fn test_last_entry() {
        let dir = tempdir().unwrap();
        let index = OffsetIndex::new(dir.path().join("a.index"), 1024).unwrap();

        index.write(0, 0).unwrap();
        index.write(7, 700).unwrap();

        assert_eq!(index.last_entry(), Some((7, 700)));
        assert_eq!(index.entry_count(), 2);
    }

    #[test]
    fn test_write_index_full() {
        let dir = tempdir().unwrap();
        // Room for exactly two entries.
        let index = OffsetIndex::new(dir.path().join("a.index"), 16).unwrap();

        index.write(0, 0).unwrap();
        index.write(1, 100).unwrap();
        let err = index.write(2, 200).unwrap_err();
        assert!(matches!(err, StreamlogError::IndexFull));

        // Existing entries are untouched.
        assert_eq!(index.entry_count(), 2);
        assert_eq!(index.lookup(2), 100);
    }

    #[test]
    fn test_truncate() {
        let dir = tempdir().unwrap();
        let index = OffsetIndex::new(dir.path().join("a.index"), 1024).unwrap();

        index.write(0, 0).unwrap();
        index.write(10, 1000).unwrap();

        index.truncate(INDEX_ENTRY_SIZE).unwrap();
        assert_eq!(index.entry_count(), 1);
        assert_eq!(index.last_entry(), Some((0, 0)));

        index.truncate(0).unwrap();
        assert!(index.last_entry().is_none());

        assert!(index.truncate(2048).is_err());
    }

    #[test]
    fn test_close_truncates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.index");
        let index = OffsetIndex::new(&path, 1024).unwrap();

        index.write(0, 0).unwrap();
        index.close().unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), INDEX_ENTRY_SIZE);
    }

    #[test]
    fn test_reopen_recovers_entries_after_clean_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.index");

        {
            let index = OffsetIndex::new(&path, 1024).unwrap();
            index.write(0, 0).unwrap();
            index.write(10, 700).unwrap();
            index.close().unwrap();
        }

        let index = OffsetIndex::new(&path, 1024).unwrap();
        assert_eq!(index.entry_count(), 2);
        assert_eq!(index.last_entry(), Some((10, 700)));
        assert_eq!(index.lookup(15), 700);
    }

    #[test]
    fn test_reopen_without_close_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.index");

        {
            let index = OffsetIndex::new(&path, 1024).unwrap();
            index.write(0, 0).unwrap();
            // No close: the file keeps its pre-allocated length, so the
            // stored entries are untrusted on reopen.
        }

        let index = OffsetIndex::new(&path, 1024).unwrap();
        assert_eq!(index.entry_count(), 0);
        assert!(index.last_entry().is_none());
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.index");
        let index = OffsetIndex::new(&path, 1024).unwrap();

        index.delete().unwrap();
        assert!(!path.exists());
        index.delete().unwrap();
    }
}
