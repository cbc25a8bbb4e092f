//! Default configuration values

/// Default TCP listen address for the broker
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9092";

/// Default data directory
pub const DEFAULT_BASE_DIR: &str = "./data";

/// Default topic served by the single-partition broker
pub const DEFAULT_TOPIC: &str = "default";

/// Default partition id
pub const DEFAULT_PARTITION_ID: i32 = 0;

/// Default log level when `RUST_LOG` is unset
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Segment log pre-allocation size and full-trigger threshold (1 GiB)
pub const DEFAULT_SEGMENT_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Index file pre-allocation size (10 MiB)
pub const DEFAULT_INDEX_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Log bytes between sparse index entries (4 KiB); 0 indexes only the
/// first batch of each segment
pub const DEFAULT_INDEX_INTERVAL_BYTES: u64 = 4096;

/// Time-based retention horizon (7 days); -1 disables
pub const DEFAULT_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Size-based retention limit; -1 means unlimited
pub const DEFAULT_RETENTION_BYTES: i64 = -1;

/// Interval between retention passes (5 minutes)
pub const DEFAULT_RETENTION_CHECK_INTERVAL_MS: i64 = 5 * 60 * 1000;

/// Open read-only segments kept by the LRU cache
pub const DEFAULT_SEGMENT_CACHE_CAPACITY: usize = 50;
