//! Shared helpers for integration tests
#![allow(dead_code)]

use bytes::{BufMut, BytesMut};

/// CRC coverage starts at the attributes field.
const CRC_COVERAGE_START: usize = 21;
const CRC_OFFSET: usize = 17;

/// Build a valid v2 batch with an arbitrary records count and an opaque
/// payload. The engine never parses records on the write path, so the
/// payload does not need to be real record encoding.
pub fn valid_batch_bytes(base_offset: i64, records_count: i32, payload: &[u8]) -> Vec<u8> {
    valid_batch_bytes_at(
        base_offset,
        records_count,
        payload,
        chrono::Utc::now().timestamp_millis(),
    )
}

/// Like [`valid_batch_bytes`] with an explicit timestamp (ms since epoch).
pub fn valid_batch_bytes_at(
    base_offset: i64,
    records_count: i32,
    payload: &[u8],
    timestamp: i64,
) -> Vec<u8> {
    let mut batch = BytesMut::new();

    batch.put_i64(base_offset);
    batch.put_i32(49 + payload.len() as i32);
    batch.put_i32(0); // partition leader epoch
    batch.put_i8(2); // magic
    batch.put_u32(0); // crc, patched below
    batch.put_i16(0); // attributes
    batch.put_i32(records_count - 1); // last offset delta
    batch.put_i64(timestamp);
    batch.put_i64(timestamp);
    batch.put_i64(-1); // producer id
    batch.put_i16(-1); // producer epoch
    batch.put_i32(-1); // base sequence
    batch.put_i32(records_count);
    batch.put_slice(payload);

    let crc = crc32c::crc32c(&batch[CRC_COVERAGE_START..]);
    batch[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_be_bytes());

    batch.to_vec()
}

/// Base offset stamped in the first 8 bytes of a batch or fetch response.
pub fn batch_base_offset(data: &[u8]) -> i64 {
    i64::from_be_bytes(data[0..8].try_into().unwrap())
}
