//! Error types for Streamlog
//!
//! A single crate-wide error enum keeps the storage layer's error kinds
//! explicit: `SegmentFull` and `IndexFull` are control-flow signals for the
//! partition (roll) and segment (skip indexing) respectively, while the
//! decode errors surface to callers unchanged.

use thiserror::Error;

/// Result type alias for Streamlog operations
pub type Result<T> = std::result::Result<T, StreamlogError>;

/// Errors that can occur in Streamlog operations
#[derive(Error, Debug)]
pub enum StreamlogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer shorter than the batch header or the declared batch length.
    #[error("insufficient data to decode record batch")]
    InsufficientData,

    /// Magic byte other than 2; only the v2 batch format is supported.
    #[error("invalid magic byte: expected 2, got {0}")]
    InvalidMagic(i8),

    /// Stored batch CRC does not match CRC-32C of the covered bytes.
    #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },

    /// The log has no room left for the batch; the partition rolls on this.
    #[error("segment is full")]
    SegmentFull,

    /// The index has no room left for another entry.
    #[error("index is full")]
    IndexFull,

    /// Requested offset lies outside the partition's retained range.
    #[error("offset {0} out of range")]
    OffsetOutOfRange(i64),

    /// Batch buffer too short to carry a base offset.
    #[error("invalid batch length: {0}")]
    InvalidBatchLength(usize),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl StreamlogError {
    /// True for the full-segment signal that triggers a roll.
    pub fn is_segment_full(&self) -> bool {
        matches!(self, Self::SegmentFull)
    }

    /// True for the out-of-range read error surfaced to clients.
    pub fn is_offset_out_of_range(&self) -> bool {
        matches!(self, Self::OffsetOutOfRange(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamlogError::InvalidMagic(1);
        assert_eq!(err.to_string(), "invalid magic byte: expected 2, got 1");

        let err = StreamlogError::OffsetOutOfRange(42);
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(StreamlogError::SegmentFull.is_segment_full());
        assert!(!StreamlogError::IndexFull.is_segment_full());
        assert!(StreamlogError::OffsetOutOfRange(0).is_offset_out_of_range());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StreamlogError = io.into();
        assert!(matches!(err, StreamlogError::Io(_)));
    }
}
