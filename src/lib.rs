#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Streamlog
//!
//! Streamlog is a single-node, append-only, partitioned log storage engine
//! wire-compatible with a minimal subset of the Kafka v2 record-batch
//! format. Producers hand it binary record batches; it assigns monotonically
//! increasing 64-bit offsets, persists batches durably through memory-mapped
//! segment files, serves range reads to consumers, and reclaims space with
//! time- and size-based retention.
//!
//! ## Architecture
//!
//! - **Record batch codec** ([`storage::record`]): validates the fixed
//!   61-byte batch header and CRC-32C, exposes a zero-copy payload view.
//! - **Log and index files** ([`storage::log`], [`storage::index`]):
//!   pre-allocated, memory-mapped, with logical sizes tracked separately
//!   from physical sizes.
//! - **Segments** ([`storage::segment`]): one log + one index under a base
//!   offset; CRC-verified recovery after unclean shutdown.
//! - **Partitions** ([`storage::partition`]): ordered segments, offset
//!   assignment, segment rolling, three-phase retention.
//! - **Segment cache** ([`storage::cache`]): process-wide LRU bounding open
//!   file descriptors across partitions.
//! - **Broker** ([`server`]): a thin framed-TCP adapter dispatching produce
//!   and fetch requests onto one partition.
//!
//! ## Running the broker
//!
//! ```bash
//! # Defaults: listens on 0.0.0.0:9092, data under ./data
//! $ streamlog
//!
//! # Custom settings
//! $ streamlog --listen-addr 127.0.0.1:9092 --data-dir /var/lib/streamlog
//! ```
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamlog::storage::{Partition, PartitionConfig, RecordBatchBuilder, SegmentCache};
//!
//! fn main() -> streamlog::Result<()> {
//!     let cache = Arc::new(SegmentCache::new(50));
//!     let partition = Partition::open(
//!         std::path::Path::new("./data"),
//!         "events",
//!         0,
//!         PartitionConfig::default(),
//!         cache,
//!     )?;
//!
//!     let mut builder = RecordBatchBuilder::new();
//!     builder.append(None, "hello");
//!     let mut batch = builder.build().to_vec();
//!
//!     let offset = partition.append(&mut batch)?;
//!     let data = partition.read(offset, 1024 * 1024)?;
//!     assert!(!data.is_empty());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

pub use config::{ConfigFile, ServerArgs, ServerConfig};
pub use error::{Result, StreamlogError};
pub use server::Broker;
pub use storage::{
    decode_batch, Partition, PartitionConfig, RecordBatchBuilder, RetentionCleaner, Segment,
    SegmentCache, SegmentConfig,
};
