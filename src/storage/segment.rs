//! Segment: one log file + one index file under a shared base offset
//!
//! A segment is the unit of file rotation and deletion. It pairs a
//! pre-allocated mmap log with a sparse offset index and enforces the
//! append/read contracts:
//!
//! - every appended batch's in-file `BaseOffset` equals the segment's
//!   `next_offset` observed just before the append;
//! - the on-disk range `[0, log.size())` is always a contiguous sequence of
//!   well-formed, CRC-valid batches.
//!
//! Opening a segment always runs recovery (`recover`), which re-establishes
//! `next_offset`, the logical log size, and a consistent sparse index after
//! an unclean shutdown: the scan CRC-verifies every batch, stops at the
//! zero-filled pre-allocation tail or the first corrupt batch, and truncates
//! the corrupt tail from the logical view. Recovery never deletes files.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, StreamlogError};
use crate::storage::index::OffsetIndex;
use crate::storage::log::Log;
use crate::storage::record::{decode_batch, BATCH_HEADER_SIZE, BATCH_OVERHEAD};

/// Sizing configuration shared by every segment of a partition
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Log file pre-allocation size and full-trigger threshold
    pub segment_max_bytes: u64,
    /// Index file pre-allocation size
    pub index_max_bytes: u64,
    /// Minimum log bytes between index entries; 0 indexes only the first batch
    pub index_interval_bytes: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            segment_max_bytes: 1024 * 1024 * 1024,
            index_max_bytes: 10 * 1024 * 1024,
            index_interval_bytes: 4096,
        }
    }
}

/// Log filename for a base offset: 20 decimal digits, zero-padded
pub fn segment_filename(base_offset: i64) -> String {
    format!("{base_offset:020}.log")
}

/// Index filename for a base offset
pub fn index_filename(base_offset: i64) -> String {
    format!("{base_offset:020}.index")
}

/// Unlink both files of a segment; missing files are not an error.
pub fn remove_segment_files(dir: &Path, base_offset: i64) -> Result<()> {
    for name in [segment_filename(base_offset), index_filename(base_offset)] {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

struct SegmentState {
    /// One past the last written absolute offset
    next_offset: i64,
    /// Max `MaxTimestamp` across appended batches (ms since epoch)
    largest_timestamp: i64,
    /// Log position of the most recent index entry; -1 when none
    last_indexed_pos: i64,
}

/// One log + one index under a single base offset
pub struct Segment {
    base_offset: i64,
    index_interval_bytes: u64,
    log: Log,
    index: OffsetIndex,
    state: RwLock<SegmentState>,
    path: PathBuf,
}

impl Segment {
    /// Open (or create) the segment files at
    /// `{dir}/{base_offset:020}.log` / `.index` and run recovery.
    pub fn new(dir: &Path, base_offset: i64, config: &SegmentConfig) -> Result<Self> {
        let log_path = dir.join(segment_filename(base_offset));
        let log = Log::new(&log_path, config.segment_max_bytes)?;

        let index = match OffsetIndex::new(dir.join(index_filename(base_offset)), config.index_max_bytes)
        {
            Ok(index) => index,
            Err(e) => {
                let _ = log.close();
                return Err(e);
            }
        };

        let segment = Self {
            base_offset,
            index_interval_bytes: config.index_interval_bytes,
            log,
            index,
            state: RwLock::new(SegmentState {
                next_offset: base_offset,
                largest_timestamp: 0,
                last_indexed_pos: -1,
            }),
            path: log_path,
        };

        if let Err(e) = segment.recover() {
            let _ = segment.close();
            return Err(e);
        }

        Ok(segment)
    }

    /// Append a CRC-verified batch, returning the `next_offset` observed
    /// before the append.
    ///
    /// [`StreamlogError::SegmentFull`] propagates unchanged; the partition
    /// catches it and rolls. Index write failures are swallowed.
    pub fn append(&self, batch_bytes: &[u8]) -> Result<i64> {
        let mut state = self.state.write();

        let batch = decode_batch(batch_bytes)?;
        let (_, pos) = self.log.append(batch_bytes)?;

        if self.should_index(&state, pos) {
            let rel = (batch.header.base_offset - self.base_offset) as u32;
            // Index entries are non-authoritative; recovery rebuilds them
            // from the log, so a full index does not fail the append.
            if self.index.write(rel, pos as u32).is_ok() {
                state.last_indexed_pos = pos as i64;
            }
        }

        if batch.header.max_timestamp > state.largest_timestamp {
            state.largest_timestamp = batch.header.max_timestamp;
        }

        let current = state.next_offset;
        state.next_offset = current + i64::from(batch.header.records_count);
        Ok(current)
    }

    fn should_index(&self, state: &SegmentState, pos: u64) -> bool {
        state.last_indexed_pos < 0
            || (self.index_interval_bytes > 0
                && pos - state.last_indexed_pos as u64 >= self.index_interval_bytes)
    }

    /// Read a run of whole batches starting at the batch that contains
    /// `target_offset`, up to `max_bytes` (first-batch progress guaranteed).
    ///
    /// The target must lie in `[base_offset, next_offset)`.
    pub fn read(&self, target_offset: i64, max_bytes: i32) -> Result<Bytes> {
        let state = self.state.read();

        if target_offset < self.base_offset || target_offset >= state.next_offset {
            return Err(StreamlogError::OffsetOutOfRange(target_offset));
        }

        let rel = (target_offset - self.base_offset) as u32;
        let mut pos = self.index.lookup(rel);
        let size = self.log.size();
        let mut found = false;

        // The index points at a batch boundary at or before the target;
        // scan forward until a batch's last offset reaches the target.
        while pos < size {
            let Some(header) = self.log.read_raw(pos, BATCH_HEADER_SIZE) else {
                break;
            };

            let batch_base = i64::from_be_bytes([
                header[0], header[1], header[2], header[3], header[4], header[5], header[6],
                header[7],
            ]);
            let batch_len =
                u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
            let last_delta =
                u32::from_be_bytes([header[23], header[24], header[25], header[26]]);
            let last_offset = batch_base + i64::from(last_delta);

            if last_offset < target_offset {
                pos += BATCH_OVERHEAD as u64 + u64::from(batch_len);
                continue;
            }

            found = true;
            break;
        }

        if !found {
            return Err(StreamlogError::OffsetOutOfRange(target_offset));
        }

        Ok(self.log.read_at(pos, max_bytes).unwrap_or_default())
    }

    /// Reconstruct `next_offset`, the logical log size, and the sparse index
    /// by scanning the log from the last index hint.
    fn recover(&self) -> Result<()> {
        let mut state = self.state.write();

        // Widen the logical size to the mapped region so raw reads can scan
        // the pre-allocated area.
        let mapped = self.log.mapped_len();
        self.log.set_size(mapped);

        let mut current_pos: u64 = 0;
        if let Some((rel, pos)) = self.index.last_entry() {
            if u64::from(pos) <= mapped {
                current_pos = u64::from(pos);
                state.last_indexed_pos = i64::from(pos);
                state.next_offset = self.base_offset + i64::from(rel);
            } else {
                // Index points past the log: rebuild it from scratch.
                self.index.truncate(0)?;
                state.last_indexed_pos = -1;
            }
        }

        loop {
            let Some(prefix) = self.log.read_raw(current_pos, BATCH_OVERHEAD) else {
                break;
            };
            let batch_len = u32::from_be_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]);
            if batch_len == 0 {
                // Zero-filled pre-allocation tail.
                break;
            }

            let total = BATCH_OVERHEAD as u64 + u64::from(batch_len);
            let Some(data) = self.log.read_raw(current_pos, total as usize) else {
                break;
            };
            let Ok(batch) = decode_batch(&data) else {
                // Torn or corrupt tail ends the valid region.
                break;
            };

            if self.should_index(&state, current_pos) && batch.header.base_offset >= self.base_offset
            {
                let rel = (batch.header.base_offset - self.base_offset) as u32;
                if self.index.write(rel, current_pos as u32).is_ok() {
                    state.last_indexed_pos = current_pos as i64;
                }
                // A full index stops gaining entries but the scan continues:
                // next_offset must still come from the last valid batch.
            }

            if batch.header.max_timestamp > state.largest_timestamp {
                state.largest_timestamp = batch.header.max_timestamp;
            }
            state.next_offset = batch.header.base_offset + i64::from(batch.header.records_count);
            current_pos += total;
        }

        self.log.set_size(current_pos);

        debug!(
            base_offset = self.base_offset,
            next_offset = state.next_offset,
            log_size = current_pos,
            index_entries = self.index.entry_count(),
            "segment recovered"
        );

        Ok(())
    }

    /// Immutable base offset of this segment
    pub fn base_offset(&self) -> i64 {
        self.base_offset
    }

    /// One past the last written absolute offset
    pub fn next_offset(&self) -> i64 {
        self.state.read().next_offset
    }

    /// Max `MaxTimestamp` seen across appended batches
    pub fn largest_timestamp(&self) -> i64 {
        self.state.read().largest_timestamp
    }

    /// Logical size of the log in bytes
    pub fn size(&self) -> u64 {
        self.log.size()
    }

    /// Number of sparse index entries currently stored
    pub fn index_entry_count(&self) -> u64 {
        self.index.entry_count()
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close both files: msync, munmap, truncate to logical sizes.
    pub fn close(&self) -> Result<()> {
        let index = self.index.close();
        let log = self.log.close();
        index.and(log)
    }

    /// Unlink both files. Safe only once evicted from the segment cache.
    pub fn delete(&self) -> Result<()> {
        self.index.delete()?;
        self.log.delete()
    }
}
