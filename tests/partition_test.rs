//! Partition-level integration tests
//!
//! Cover offset assignment, the in-place base offset rewrite, segment
//! rolling, cross-segment reads through the LRU cache, read boundary
//! behavior, and state preservation across close/reopen.

mod common;

use std::sync::Arc;

use streamlog::storage::{
    decode_batch, Partition, PartitionConfig, SegmentCache, SegmentConfig,
};
use tempfile::tempdir;

use common::{batch_base_offset, valid_batch_bytes};

fn test_config(segment_max_bytes: u64) -> PartitionConfig {
    PartitionConfig {
        segment: SegmentConfig {
            segment_max_bytes,
            index_max_bytes: 1024 * 1024,
            index_interval_bytes: 10,
        },
        retention_ms: -1,
        retention_bytes: -1,
    }
}

#[test]
fn test_basic_roundtrip() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SegmentCache::new(10));
    let partition = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(1024 * 1024),
        cache,
    )
    .unwrap();

    // Clients send batches with base offset 0; the partition rewrites them.
    let mut first = valid_batch_bytes(0, 10, b"payload-1");
    let mut second = valid_batch_bytes(0, 10, b"payload-2");
    let mut third = valid_batch_bytes(0, 5, b"payload-3");

    assert_eq!(partition.append(&mut first).unwrap(), 0);
    assert_eq!(partition.append(&mut second).unwrap(), 10);
    assert_eq!(partition.append(&mut third).unwrap(), 20);
    assert_eq!(partition.next_offset(), 25);

    let data = partition.read(10, 1024 * 1024).unwrap();
    assert_eq!(batch_base_offset(&data), 10);

    partition.close().unwrap();
}

#[test]
fn test_rewritten_batch_remains_crc_valid() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SegmentCache::new(10));
    let partition = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(1024 * 1024),
        cache,
    )
    .unwrap();

    let mut filler = valid_batch_bytes(0, 7, b"filler");
    partition.append(&mut filler).unwrap();

    let mut batch = valid_batch_bytes(0, 3, b"interesting");
    let assigned = partition.append(&mut batch).unwrap();
    assert_eq!(assigned, 7);

    // Read back and decode: the stored bytes carry the assigned base offset
    // and still pass CRC validation.
    let data = partition.read(assigned, batch.len() as i32).unwrap();
    assert_eq!(&data[..], &batch[..]);

    let decoded = decode_batch(&data).unwrap();
    assert_eq!(decoded.header.base_offset, 7);

    partition.close().unwrap();
}

#[test]
fn test_roll_and_read_across_segments() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SegmentCache::new(10));

    // Exactly two 70-byte batches fit per segment.
    let batch_len = valid_batch_bytes(0, 1, b"payload-0").len() as u64;
    let partition = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(batch_len * 2),
        Arc::clone(&cache),
    )
    .unwrap();

    for i in 0..5 {
        let mut batch = valid_batch_bytes(0, 1, format!("payload-{i}").as_bytes());
        assert_eq!(partition.append(&mut batch).unwrap(), i);
    }

    assert!(partition.segment_count() >= 3);
    assert_eq!(partition.segment_base_offsets(), vec![0, 2, 4]);

    // Reads below the active segment go through the cache.
    for target in 0..5 {
        let data = partition.read(target, 1024 * 1024).unwrap();
        assert_eq!(batch_base_offset(&data), target);
    }
    assert!(!cache.is_empty());

    partition.close().unwrap();
}

#[test]
fn test_exact_fit_does_not_roll() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SegmentCache::new(10));

    let batch = valid_batch_bytes(0, 2, b"exact");
    let partition = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(batch.len() as u64),
        cache,
    )
    .unwrap();

    let mut exact = batch.clone();
    partition.append(&mut exact).unwrap();
    assert_eq!(partition.segment_count(), 1);

    // The next batch no longer fits and triggers a roll.
    let mut next = batch.clone();
    assert_eq!(partition.append(&mut next).unwrap(), 2);
    assert_eq!(partition.segment_count(), 2);

    partition.close().unwrap();
}

#[test]
fn test_read_boundaries() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SegmentCache::new(10));
    let partition = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(1024 * 1024),
        cache,
    )
    .unwrap();

    let mut batch = valid_batch_bytes(0, 5, b"payload");
    partition.append(&mut batch).unwrap();

    // Tail poll at next_offset: empty, not an error.
    assert!(partition.read(5, 1024).unwrap().is_empty());

    // Strictly beyond: an error.
    assert!(partition
        .read(6, 1024)
        .unwrap_err()
        .is_offset_out_of_range());

    partition.close().unwrap();
}

#[test]
fn test_read_size_bound_with_progress() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SegmentCache::new(10));
    let partition = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(1024 * 1024),
        cache,
    )
    .unwrap();

    let mut first = valid_batch_bytes(0, 1, b"aaaa");
    let mut second = valid_batch_bytes(0, 1, b"bbbb");
    let first_len = first.len();
    partition.append(&mut first).unwrap();
    partition.append(&mut second).unwrap();

    // max_bytes bounds the result to whole batches.
    let data = partition.read(0, first_len as i32).unwrap();
    assert_eq!(data.len(), first_len);

    // Even a tiny max_bytes returns the first batch whole.
    let data = partition.read(0, 1).unwrap();
    assert_eq!(data.len(), first_len);

    partition.close().unwrap();
}

#[test]
fn test_close_and_reopen_preserves_state() {
    let dir = tempdir().unwrap();

    let (next_offset, base_offsets) = {
        let cache = Arc::new(SegmentCache::new(10));
        let batch_len = valid_batch_bytes(0, 1, b"payload-0").len() as u64;
        let partition = Partition::open(
            dir.path(),
            "test",
            0,
            test_config(batch_len * 2),
            cache,
        )
        .unwrap();

        for i in 0..5 {
            let mut batch = valid_batch_bytes(0, 1, format!("payload-{i}").as_bytes());
            partition.append(&mut batch).unwrap();
        }
        let out = (partition.next_offset(), partition.segment_base_offsets());
        partition.close().unwrap();
        out
    };

    let cache = Arc::new(SegmentCache::new(10));
    let batch_len = valid_batch_bytes(0, 1, b"payload-0").len() as u64;
    let reopened = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(batch_len * 2),
        cache,
    )
    .unwrap();

    assert_eq!(reopened.next_offset(), next_offset);
    assert_eq!(reopened.segment_base_offsets(), base_offsets);

    // Every stored offset is still served, and appends continue seamlessly.
    for target in 0..next_offset {
        let data = reopened.read(target, 1024 * 1024).unwrap();
        assert_eq!(batch_base_offset(&data), target);
    }

    let mut batch = valid_batch_bytes(0, 1, b"after-reopen");
    assert_eq!(reopened.append(&mut batch).unwrap(), next_offset);

    reopened.close().unwrap();
}

#[test]
fn test_partitions_are_isolated_by_directory() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SegmentCache::new(10));

    let p0 = Partition::open(
        dir.path(),
        "test",
        0,
        test_config(1024 * 1024),
        Arc::clone(&cache),
    )
    .unwrap();
    let p1 = Partition::open(
        dir.path(),
        "test",
        1,
        test_config(1024 * 1024),
        cache,
    )
    .unwrap();

    let mut batch = valid_batch_bytes(0, 4, b"only-p0");
    p0.append(&mut batch).unwrap();

    assert_eq!(p0.next_offset(), 4);
    assert_eq!(p1.next_offset(), 0);
    // Tail poll on the untouched partition: nothing there yet.
    assert!(p1.read(0, 1024).unwrap().is_empty());

    p0.close().unwrap();
    p1.close().unwrap();
}
