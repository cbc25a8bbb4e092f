//! Partition: an ordered sequence of segments forming one append-only log
//!
//! A partition owns a directory `{base_dir}/{topic}-{id}` and tracks its
//! segments by base offset only: sealed segments are opened lazily through
//! the shared LRU cache, while exactly one *active* segment (the one with
//! the largest base offset) stays fully open for writes.
//!
//! Invariants:
//! - base offsets in the segment list are strictly increasing;
//! - at the moment of a roll, the new segment's base offset equals the old
//!   active segment's `next_offset`, so the offset space has no gaps;
//! - `log_start_offset` never exceeds the first segment's base offset except
//!   transiently inside a retention pass, which advances it.
//!
//! Appends serialize under the partition's write lock; reads share the read
//! lock and may run in parallel with each other but not with appends. The
//! lock is held across a segment roll, making the roll the worst-case
//! latency spike on the write path.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, StreamlogError};
use crate::storage::cache::{cache_key, SegmentCache};
use crate::storage::segment::{remove_segment_files, segment_filename, Segment, SegmentConfig};

/// Per-partition configuration
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Sizing for every segment of this partition
    pub segment: SegmentConfig,
    /// Delete segments whose newest timestamp is older than this; -1 disables
    pub retention_ms: i64,
    /// Delete oldest segments while the partition exceeds this; -1 disables
    pub retention_bytes: i64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            segment: SegmentConfig::default(),
            retention_ms: 7 * 24 * 60 * 60 * 1000,
            retention_bytes: -1,
        }
    }
}

struct PartitionInner {
    /// Base offsets of all segments, ascending; the last one is active.
    segments: Vec<i64>,
    /// The unique segment accepting appends. Never enters the LRU cache.
    active: Arc<Segment>,
    /// Lowest absolute offset still considered present
    log_start_offset: i64,
}

/// An ordered collection of segments under one directory
pub struct Partition {
    topic: String,
    id: i32,
    dir: PathBuf,
    config: PartitionConfig,
    cache: Arc<SegmentCache>,
    inner: RwLock<PartitionInner>,
}

impl Partition {
    /// Create or recover a partition at `{base_dir}/{topic}-{id}`.
    ///
    /// Only the last (active) segment is opened eagerly; earlier segments
    /// are recorded by base offset and loaded on demand via the cache.
    pub fn open(
        base_dir: &Path,
        topic: &str,
        id: i32,
        config: PartitionConfig,
        cache: Arc<SegmentCache>,
    ) -> Result<Self> {
        let dir = base_dir.join(format!("{topic}-{id}"));
        fs::create_dir_all(&dir)?;

        let mut segments = scan_segments(&dir)?;

        let active = if segments.is_empty() {
            segments.push(0);
            Segment::new(&dir, 0, &config.segment)?
        } else {
            Segment::new(&dir, segments[segments.len() - 1], &config.segment)?
        };

        info!(
            topic = %topic,
            partition = id,
            segments = segments.len(),
            next_offset = active.next_offset(),
            "partition opened"
        );

        let log_start_offset = segments[0];
        Ok(Self {
            topic: topic.to_string(),
            id,
            dir,
            config,
            cache,
            inner: RwLock::new(PartitionInner {
                segments,
                active: Arc::new(active),
                log_start_offset,
            }),
        })
    }

    /// Append a batch, assigning it the partition's next offset.
    ///
    /// The first 8 bytes of `batch_bytes` are overwritten in place with the
    /// assigned base offset, which is safe because CRC coverage starts at
    /// byte 21.
    /// When the active segment is full it is closed, a new segment is
    /// created at the preserved `next_offset`, and the append is retried
    /// once; any further error is fatal.
    pub fn append(&self, batch_bytes: &mut [u8]) -> Result<i64> {
        let mut inner = self.inner.write();

        if batch_bytes.len() < 8 {
            return Err(StreamlogError::InvalidBatchLength(batch_bytes.len()));
        }

        let assigned = inner.active.next_offset();
        batch_bytes[0..8].copy_from_slice(&(assigned as u64).to_be_bytes());

        match inner.active.append(batch_bytes) {
            Ok(offset) => Ok(offset),
            Err(StreamlogError::SegmentFull) => {
                // next_offset is untouched by the failed append.
                let roll_base = inner.active.next_offset();
                inner.active.close()?;

                info!(
                    topic = %self.topic,
                    partition = self.id,
                    old_base = inner.segments[inner.segments.len() - 1],
                    new_base = roll_base,
                    "rolling segment"
                );

                let segment = Segment::new(&self.dir, roll_base, &self.config.segment)?;
                inner.segments.push(roll_base);
                inner.active = Arc::new(segment);

                inner.active.append(batch_bytes)
            }
            Err(e) => Err(e),
        }
    }

    /// Read batches starting at the one containing `target_offset`.
    ///
    /// Returns an empty buffer when the target equals the next offset
    /// (semantic end-of-log), so tailing consumers can poll without error.
    /// Targets below the retained range or past the end are
    /// [`StreamlogError::OffsetOutOfRange`].
    pub fn read(&self, target_offset: i64, max_bytes: i32) -> Result<Bytes> {
        let inner = self.inner.read();

        if inner.segments.is_empty() || target_offset < inner.segments[0] {
            return Err(StreamlogError::OffsetOutOfRange(target_offset));
        }
        if target_offset >= inner.active.next_offset() {
            if target_offset == inner.active.next_offset() {
                return Ok(Bytes::new());
            }
            return Err(StreamlogError::OffsetOutOfRange(target_offset));
        }

        // Hot path: the active segment serves tail reads without touching
        // the cache.
        if target_offset >= inner.active.base_offset() {
            return inner.active.read(target_offset, max_bytes);
        }

        // Largest base offset at or below the target.
        let idx = inner.segments.partition_point(|&base| base <= target_offset) - 1;
        let base = inner.segments[idx];

        let key = cache_key(&self.topic, self.id, base);
        let dir = self.dir.clone();
        let config = self.config.segment.clone();
        let segment = self
            .cache
            .get_or_load(&key, || Segment::new(&dir, base, &config))?;

        segment.read(target_offset, max_bytes)
    }

    /// Run one retention pass: time-based, then log-start-offset, then
    /// size-based deletion. Returns the number of segments deleted.
    ///
    /// Deletions only ever remove the oldest segment, never punching a
    /// hole, and never touch the active segment; with only the
    /// active segment left, retention is a no-op.
    pub fn delete_old_segments(&self) -> usize {
        let mut inner = self.inner.write();

        let mut deleted = 0;
        deleted += self.delete_by_time(&mut inner);
        deleted += self.delete_by_log_start_offset(&mut inner);
        deleted += self.delete_by_size(&mut inner);

        if deleted > 0 {
            info!(
                topic = %self.topic,
                partition = self.id,
                deleted,
                log_start_offset = inner.log_start_offset,
                "retention deleted segments"
            );
        }
        deleted
    }

    fn delete_by_time(&self, inner: &mut PartitionInner) -> usize {
        if self.config.retention_ms <= 0 {
            return 0;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut deleted = 0;

        while self.front_is_deletable(inner) {
            let base = inner.segments[0];
            let key = cache_key(&self.topic, self.id, base);
            let dir = self.dir.clone();
            let config = self.config.segment.clone();

            let segment = match self
                .cache
                .get_or_load(&key, || Segment::new(&dir, base, &config))
            {
                Ok(segment) => segment,
                Err(e) => {
                    warn!(
                        topic = %self.topic,
                        partition = self.id,
                        base_offset = base,
                        error = %e,
                        "failed to open segment for retention"
                    );
                    break;
                }
            };

            if now - segment.largest_timestamp() <= self.config.retention_ms {
                break;
            }

            self.delete_front(inner);
            deleted += 1;
        }
        deleted
    }

    fn delete_by_log_start_offset(&self, inner: &mut PartitionInner) -> usize {
        let mut deleted = 0;
        // The front segment's next offset is the next base in the list.
        while self.front_is_deletable(inner) && inner.segments[1] <= inner.log_start_offset {
            self.delete_front(inner);
            deleted += 1;
        }
        deleted
    }

    fn delete_by_size(&self, inner: &mut PartitionInner) -> usize {
        if self.config.retention_bytes < 0 {
            return 0;
        }

        let mut total: u64 = inner
            .segments
            .iter()
            .map(|&base| self.segment_size(inner, base))
            .sum();
        let mut deleted = 0;

        while total > self.config.retention_bytes as u64 && self.front_is_deletable(inner) {
            let front_size = self.segment_size(inner, inner.segments[0]);
            self.delete_front(inner);
            total = total.saturating_sub(front_size);
            deleted += 1;
        }
        deleted
    }

    /// The front segment may be deleted only when it is not active and its
    /// offset range lies entirely below the active segment's base.
    fn front_is_deletable(&self, inner: &PartitionInner) -> bool {
        inner.segments.len() > 1 && inner.segments[1] <= inner.active.base_offset()
    }

    fn delete_front(&self, inner: &mut PartitionInner) {
        let base = inner.segments[0];

        // Evict first so the cached instance is closed before the unlink.
        self.cache.evict(&cache_key(&self.topic, self.id, base));

        if let Err(e) = remove_segment_files(&self.dir, base) {
            warn!(
                topic = %self.topic,
                partition = self.id,
                base_offset = base,
                error = %e,
                "failed to remove segment files"
            );
        }

        inner.segments.remove(0);
        inner.log_start_offset = inner.segments[0];

        debug!(
            topic = %self.topic,
            partition = self.id,
            base_offset = base,
            "segment deleted"
        );
    }

    /// Size of a segment in bytes: live size for the active or a cached
    /// segment, file size on disk otherwise.
    fn segment_size(&self, inner: &PartitionInner, base: i64) -> u64 {
        if base == inner.active.base_offset() {
            return inner.active.size();
        }
        if let Some(segment) = self.cache.get(&cache_key(&self.topic, self.id, base)) {
            return segment.size();
        }
        fs::metadata(self.dir.join(segment_filename(base)))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Total bytes across all segments
    pub fn size_bytes(&self) -> u64 {
        let inner = self.inner.read();
        inner
            .segments
            .iter()
            .map(|&base| self.segment_size(&inner, base))
            .sum()
    }

    /// Topic name
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition id
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Directory holding this partition's segment files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Offset that will be assigned to the next appended record
    pub fn next_offset(&self) -> i64 {
        self.inner.read().active.next_offset()
    }

    /// Lowest offset still considered present
    pub fn log_start_offset(&self) -> i64 {
        self.inner.read().log_start_offset
    }

    /// Number of segments, including the active one
    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }

    /// Base offsets of all segments, ascending
    pub fn segment_base_offsets(&self) -> Vec<i64> {
        self.inner.read().segments.clone()
    }

    /// Close the active segment. Cached sealed segments are closed by the
    /// cache itself.
    pub fn close(&self) -> Result<()> {
        let inner = self.inner.read();
        inner.active.close()
    }
}

/// Collect segment base offsets from `*.log` filenames, ascending.
fn scan_segments(dir: &Path) -> Result<Vec<i64>> {
    let mut bases = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".log") else {
            continue;
        };

        let base = stem.parse::<i64>().map_err(|_| {
            StreamlogError::Storage(format!("invalid segment filename: {name}"))
        })?;
        bases.push(base);
    }

    bases.sort_unstable();
    Ok(bases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::storage::record::RecordBatchBuilder;

    fn test_config(segment_max_bytes: u64) -> PartitionConfig {
        PartitionConfig {
            segment: SegmentConfig {
                segment_max_bytes,
                index_max_bytes: 1024,
                index_interval_bytes: 10,
            },
            retention_ms: -1,
            retention_bytes: -1,
        }
    }

    fn batch_with_records(count: usize) -> Vec<u8> {
        let mut builder = RecordBatchBuilder::new();
        for i in 0..count {
            builder.append(None, format!("value-{i}"));
        }
        builder.build().to_vec()
    }

    #[test]
    fn test_append_assigns_contiguous_offsets() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(SegmentCache::new(4));
        let partition =
            Partition::open(dir.path(), "events", 0, test_config(1024 * 1024), cache).unwrap();

        let mut first = batch_with_records(3);
        let mut second = batch_with_records(2);

        assert_eq!(partition.append(&mut first).unwrap(), 0);
        assert_eq!(partition.append(&mut second).unwrap(), 3);
        assert_eq!(partition.next_offset(), 5);

        // The in-place rewrite stamped the assigned base offset.
        assert_eq!(i64::from_be_bytes(second[0..8].try_into().unwrap()), 3);

        partition.close().unwrap();
    }

    #[test]
    fn test_append_rejects_short_buffer() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(SegmentCache::new(4));
        let partition =
            Partition::open(dir.path(), "events", 0, test_config(1024 * 1024), cache).unwrap();

        let mut short = [0u8; 4];
        let err = partition.append(&mut short).unwrap_err();
        assert!(matches!(err, StreamlogError::InvalidBatchLength(4)));

        partition.close().unwrap();
    }

    #[test]
    fn test_read_at_next_offset_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(SegmentCache::new(4));
        let partition =
            Partition::open(dir.path(), "events", 0, test_config(1024 * 1024), cache).unwrap();

        let mut batch = batch_with_records(5);
        partition.append(&mut batch).unwrap();

        // Tailing: reading the next offset yields no data and no error.
        assert!(partition.read(5, 1024).unwrap().is_empty());

        // Strictly past the end is an error.
        assert!(partition.read(6, 1024).unwrap_err().is_offset_out_of_range());

        partition.close().unwrap();
    }

    #[test]
    fn test_scan_rejects_bad_filenames() {
        let dir = tempdir().unwrap();
        let part_dir = dir.path().join("events-0");
        fs::create_dir_all(&part_dir).unwrap();
        fs::write(part_dir.join("not-a-number.log"), b"").unwrap();

        let cache = Arc::new(SegmentCache::new(4));
        let result = Partition::open(dir.path(), "events", 0, test_config(1024), cache);
        assert!(result.is_err());
    }
}
