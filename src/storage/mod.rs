//! Storage engine for Streamlog
//!
//! The storage layer is a partitioned, append-only log of Kafka v2 record
//! batches. Leaf-first: the [`record`] codec validates batches, [`log`] and
//! [`index`] are memory-mapped pre-allocated files, [`segment`] pairs one of
//! each under a base offset, [`partition`] orders segments and assigns
//! offsets, [`cache`] bounds open file descriptors across partitions, and
//! [`retention`] reclaims space in the background.

pub mod cache;
pub mod index;
pub mod log;
pub mod partition;
pub mod record;
pub mod retention;
pub mod segment;

pub use cache::{cache_key, SegmentCache};
pub use index::OffsetIndex;
pub use log::Log;
pub use partition::{Partition, PartitionConfig};
pub use record::{
    decode_batch, BatchHeader, Record, RecordBatch, RecordBatchBuilder, RecordHeader,
    BATCH_HEADER_SIZE, BATCH_OVERHEAD,
};
pub use retention::{CleanerConfig, RetentionCleaner};
pub use segment::{
    index_filename, remove_segment_files, segment_filename, Segment, SegmentConfig,
};
