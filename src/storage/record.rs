//! Kafka v2 record batch codec
//!
//! The engine stores and serves whole record batches; this module parses and
//! validates the fixed 61-byte batch header and exposes the packed records as
//! a zero-copy payload slice. Record-level decoding is lazy and optional;
//! the read and recovery paths only ever look at the header.
//!
//! # Batch layout (big-endian)
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ BaseOffset            i64   bytes  0..8      │
//! │ BatchLength           i32   bytes  8..12     │
//! │ PartitionLeaderEpoch  i32   bytes 12..16     │
//! │ Magic                 i8    byte  16         │
//! │ CRC                   u32   bytes 17..21     │
//! │ Attributes            i16   bytes 21..23     │
//! │ LastOffsetDelta       i32   bytes 23..27     │
//! │ BaseTimestamp         i64   bytes 27..35     │
//! │ MaxTimestamp          i64   bytes 35..43     │
//! │ ProducerId            i64   bytes 43..51     │
//! │ ProducerEpoch         i16   bytes 51..53     │
//! │ BaseSequence          i32   bytes 53..57     │
//! │ RecordsCount          i32   bytes 57..61     │
//! │ Payload               ...   bytes 61..       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `BatchLength` counts everything after itself, so a batch occupies
//! `12 + BatchLength` bytes on disk and on the wire. The CRC is CRC-32C
//! (Castagnoli) over bytes `[21 .. 12 + BatchLength)`; it deliberately
//! excludes the first 21 bytes so the broker can rewrite `BaseOffset` in
//! place without invalidating the checksum.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StreamlogError};

/// Size of the fixed batch header in bytes
pub const BATCH_HEADER_SIZE: usize = 61;

/// Bytes preceding the `BatchLength`-counted region: BaseOffset(8) + BatchLength(4)
pub const BATCH_OVERHEAD: usize = 12;

/// Offset of the CRC field within the batch
pub const CRC_OFFSET: usize = 17;

/// First byte covered by the CRC
pub const CRC_COVERAGE_START: usize = 21;

/// The only supported magic byte
pub const RECORD_BATCH_MAGIC: i8 = 2;

/// Parsed fixed-size header of a v2 record batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub base_offset: i64,
    pub batch_length: i32,
    pub partition_leader_epoch: i32,
    pub magic: i8,
    pub crc: u32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub base_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
    pub records_count: i32,
}

/// A validated view over a record batch
///
/// `payload` borrows the caller's buffer; nothing is copied on the happy
/// path beyond the header struct itself.
#[derive(Debug)]
pub struct RecordBatch<'a> {
    pub header: BatchHeader,
    pub payload: &'a [u8],
}

impl<'a> RecordBatch<'a> {
    /// Total on-disk size of the batch in bytes
    pub fn size(&self) -> usize {
        BATCH_OVERHEAD + self.header.batch_length as usize
    }

    /// Lazy, non-restartable iterator over the records in the payload
    pub fn records(&self) -> RecordIter<'a> {
        RecordIter {
            data: self.payload,
            pos: 0,
            remaining: self.header.records_count,
            base_offset: self.header.base_offset,
            base_timestamp: self.header.base_timestamp,
        }
    }
}

/// Decode and validate a record batch header.
///
/// Requires at least 61 bytes, the full declared batch, magic 2, and a
/// matching CRC-32C. Returns a view whose payload borrows `data`.
pub fn decode_batch(data: &[u8]) -> Result<RecordBatch<'_>> {
    if data.len() < BATCH_HEADER_SIZE {
        return Err(StreamlogError::InsufficientData);
    }

    let mut buf = data;
    let base_offset = buf.get_i64();
    let batch_length = buf.get_i32();

    // BatchLength counts the 49 header bytes after itself plus the payload.
    if batch_length < (BATCH_HEADER_SIZE - BATCH_OVERHEAD) as i32 {
        return Err(StreamlogError::InsufficientData);
    }
    let total = BATCH_OVERHEAD + batch_length as usize;
    if data.len() < total {
        return Err(StreamlogError::InsufficientData);
    }

    let partition_leader_epoch = buf.get_i32();
    let magic = buf.get_i8();
    if magic != RECORD_BATCH_MAGIC {
        return Err(StreamlogError::InvalidMagic(magic));
    }

    let crc = buf.get_u32();
    let computed = crc32c::crc32c(&data[CRC_COVERAGE_START..total]);
    if computed != crc {
        return Err(StreamlogError::CrcMismatch {
            stored: crc,
            computed,
        });
    }

    let header = BatchHeader {
        base_offset,
        batch_length,
        partition_leader_epoch,
        magic,
        crc,
        attributes: buf.get_i16(),
        last_offset_delta: buf.get_i32(),
        base_timestamp: buf.get_i64(),
        max_timestamp: buf.get_i64(),
        producer_id: buf.get_i64(),
        producer_epoch: buf.get_i16(),
        base_sequence: buf.get_i32(),
        records_count: buf.get_i32(),
    };

    Ok(RecordBatch {
        header,
        payload: &data[BATCH_HEADER_SIZE..total],
    })
}

/// A single record decoded from a batch payload
///
/// Key and value borrow the payload; `None` encodes a null key or value.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub attributes: i8,
    pub timestamp_delta: i64,
    pub offset_delta: i32,
    /// Absolute offset: batch base offset + offset delta
    pub offset: i64,
    /// Absolute timestamp: batch base timestamp + timestamp delta
    pub timestamp: i64,
    pub key: Option<&'a [u8]>,
    pub value: Option<&'a [u8]>,
    pub headers_count: i64,
    headers_raw: &'a [u8],
}

impl<'a> Record<'a> {
    /// Iterator over the record's headers
    pub fn headers(&self) -> HeaderIter<'a> {
        HeaderIter {
            data: self.headers_raw,
            pos: 0,
            remaining: self.headers_count,
        }
    }
}

/// Iterator over the records of a batch payload
///
/// Decoding is done in place; a malformed record terminates the iterator.
pub struct RecordIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: i32,
    base_offset: i64,
    base_timestamp: i64,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        if self.remaining <= 0 || self.pos >= self.data.len() {
            return None;
        }

        let length = decode_varint(self.data, &mut self.pos)?;
        if length < 0 {
            return None;
        }
        let record_end = self.pos.checked_add(length as usize)?;
        if record_end > self.data.len() {
            return None;
        }

        let attributes = *self.data.get(self.pos)? as i8;
        self.pos += 1;

        let timestamp_delta = decode_varint(self.data, &mut self.pos)?;
        let offset_delta = decode_varint(self.data, &mut self.pos)?;

        let key = decode_bytes(self.data, &mut self.pos, record_end)?;
        let value = decode_bytes(self.data, &mut self.pos, record_end)?;

        let headers_count = decode_varint(self.data, &mut self.pos)?;
        let headers_raw = if self.pos < record_end {
            &self.data[self.pos..record_end]
        } else {
            &[]
        };

        self.pos = record_end;
        self.remaining -= 1;

        Some(Record {
            attributes,
            timestamp_delta,
            offset_delta: offset_delta as i32,
            offset: self.base_offset + offset_delta,
            timestamp: self.base_timestamp + timestamp_delta,
            key,
            value,
            headers_count,
            headers_raw,
        })
    }
}

/// A record header (key-value metadata)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// Iterator over a record's headers
pub struct HeaderIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: i64,
}

impl<'a> Iterator for HeaderIter<'a> {
    type Item = RecordHeader<'a>;

    fn next(&mut self) -> Option<RecordHeader<'a>> {
        if self.remaining <= 0 || self.pos >= self.data.len() {
            return None;
        }

        let key_len = decode_varint(self.data, &mut self.pos)?;
        let key = if key_len > 0 {
            let end = self.pos.checked_add(key_len as usize)?;
            let slice = self.data.get(self.pos..end)?;
            self.pos = end;
            slice
        } else {
            &[]
        };

        let value_len = decode_varint(self.data, &mut self.pos)?;
        let value = if value_len > 0 {
            let end = self.pos.checked_add(value_len as usize)?;
            let slice = self.data.get(self.pos..end)?;
            self.pos = end;
            slice
        } else {
            &[]
        };

        self.remaining -= 1;
        Some(RecordHeader { key, value })
    }
}

/// Decode a varint-length-prefixed byte slice; -1 length means null.
fn decode_bytes<'a>(data: &'a [u8], pos: &mut usize, limit: usize) -> Option<Option<&'a [u8]>> {
    let len = decode_varint(data, pos)?;
    if len < 0 {
        return Some(None);
    }
    let end = pos.checked_add(len as usize)?;
    if end > limit {
        return None;
    }
    let slice = &data[*pos..end];
    *pos = end;
    Some(Some(slice))
}

/// Decode a zigzag-encoded varint, advancing `pos` past it.
pub(crate) fn decode_varint(data: &[u8], pos: &mut usize) -> Option<i64> {
    let mut acc: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        acc |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    Some(((acc >> 1) as i64) ^ -((acc & 1) as i64))
}

/// Append a zigzag-encoded varint to `buf`.
pub(crate) fn encode_varint(buf: &mut BytesMut, value: i64) {
    let mut v = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        if v < 0x80 {
            buf.put_u8(v as u8);
            return;
        }
        buf.put_u8((v & 0x7f) as u8 | 0x80);
        v >>= 7;
    }
}

/// Builder for valid v2 record batches
///
/// Produces a batch with `BaseOffset` zero; the partition assigns the real
/// base offset on append. The CRC is stamped last, over everything from the
/// attributes onward.
#[derive(Debug)]
pub struct RecordBatchBuilder {
    base_timestamp: i64,
    records: Vec<BuilderRecord>,
}

#[derive(Debug)]
struct BuilderRecord {
    key: Option<Bytes>,
    value: Bytes,
}

impl RecordBatchBuilder {
    /// Create a builder stamped with the current wall-clock time.
    pub fn new() -> Self {
        Self::with_base_timestamp(chrono::Utc::now().timestamp_millis())
    }

    /// Create a builder with an explicit base timestamp (ms since epoch).
    pub fn with_base_timestamp(base_timestamp: i64) -> Self {
        Self {
            base_timestamp,
            records: Vec::new(),
        }
    }

    /// Append a key-value record to the batch.
    pub fn append(&mut self, key: Option<Bytes>, value: impl Into<Bytes>) -> &mut Self {
        self.records.push(BuilderRecord {
            key,
            value: value.into(),
        });
        self
    }

    /// Number of records added so far
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Encode the batch into wire bytes.
    pub fn build(&self) -> Bytes {
        let mut batch = BytesMut::with_capacity(BATCH_HEADER_SIZE + 64 * self.records.len());

        batch.put_i64(0); // base offset, assigned by the broker
        batch.put_i32(0); // batch length, patched below
        batch.put_i32(0); // partition leader epoch
        batch.put_i8(RECORD_BATCH_MAGIC);
        batch.put_u32(0); // crc, patched below
        batch.put_i16(0); // attributes
        batch.put_i32(self.records.len() as i32 - 1); // last offset delta
        batch.put_i64(self.base_timestamp);
        batch.put_i64(self.base_timestamp); // max timestamp; all deltas are zero
        batch.put_i64(-1); // producer id
        batch.put_i16(-1); // producer epoch
        batch.put_i32(-1); // base sequence
        batch.put_i32(self.records.len() as i32);

        for (delta, record) in self.records.iter().enumerate() {
            encode_record(&mut batch, delta as i64, record.key.as_deref(), &record.value);
        }

        let batch_length = (batch.len() - BATCH_OVERHEAD) as i32;
        batch[8..12].copy_from_slice(&batch_length.to_be_bytes());

        let crc = crc32c::crc32c(&batch[CRC_COVERAGE_START..]);
        batch[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_be_bytes());

        batch.freeze()
    }
}

impl Default for RecordBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_record(batch: &mut BytesMut, offset_delta: i64, key: Option<&[u8]>, value: &[u8]) {
    let mut body = BytesMut::with_capacity(16 + key.map_or(0, <[u8]>::len) + value.len());

    body.put_i8(0); // attributes
    encode_varint(&mut body, 0); // timestamp delta
    encode_varint(&mut body, offset_delta);

    match key {
        Some(key) => {
            encode_varint(&mut body, key.len() as i64);
            body.put_slice(key);
        }
        None => encode_varint(&mut body, -1),
    }

    encode_varint(&mut body, value.len() as i64);
    body.put_slice(value);

    encode_varint(&mut body, 0); // header count

    encode_varint(batch, body.len() as i64);
    batch.put_slice(&body);
}
