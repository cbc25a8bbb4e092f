//! Configuration for the Streamlog broker
//!
//! Resolution order for every option: command-line flag, then config file,
//! then built-in default. The resolved [`ServerConfig`] is validated once
//! before the broker starts.

pub mod args;
pub mod defaults;
pub mod file;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Result, StreamlogError};
use crate::storage::{PartitionConfig, SegmentConfig};

pub use args::ServerArgs;
pub use defaults::*;
pub use file::{ConfigFile, RetentionSection, StorageSection};

/// Storage sizing options
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub segment_max_bytes: u64,
    pub index_max_bytes: u64,
    pub index_interval_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
            index_max_bytes: DEFAULT_INDEX_MAX_BYTES,
            index_interval_bytes: DEFAULT_INDEX_INTERVAL_BYTES,
        }
    }
}

/// Retention options
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_ms: i64,
    pub retention_bytes: i64,
    pub retention_check_interval_ms: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_ms: DEFAULT_RETENTION_MS,
            retention_bytes: DEFAULT_RETENTION_BYTES,
            retention_check_interval_ms: DEFAULT_RETENTION_CHECK_INTERVAL_MS,
        }
    }
}

/// Fully resolved broker configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub base_dir: PathBuf,
    pub topic: String,
    pub partition_id: i32,
    pub log_level: String,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub segment_cache_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            topic: DEFAULT_TOPIC.to_string(),
            partition_id: DEFAULT_PARTITION_ID,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            segment_cache_capacity: DEFAULT_SEGMENT_CACHE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Resolve CLI args and an optional config file into a full config.
    pub fn resolve(args: ServerArgs, file: Option<ConfigFile>) -> Self {
        let file = file.unwrap_or_default();

        Self {
            listen_addr: args
                .listen_addr
                .or(file.listen_addr)
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            base_dir: args
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR)),
            topic: args
                .topic
                .or(file.topic)
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            partition_id: args
                .partition_id
                .or(file.partition_id)
                .unwrap_or(DEFAULT_PARTITION_ID),
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            storage: StorageConfig {
                segment_max_bytes: args
                    .segment_max_bytes
                    .or(file.storage.segment_max_bytes)
                    .unwrap_or(DEFAULT_SEGMENT_MAX_BYTES),
                index_max_bytes: args
                    .index_max_bytes
                    .or(file.storage.index_max_bytes)
                    .unwrap_or(DEFAULT_INDEX_MAX_BYTES),
                index_interval_bytes: args
                    .index_interval_bytes
                    .or(file.storage.index_interval_bytes)
                    .unwrap_or(DEFAULT_INDEX_INTERVAL_BYTES),
            },
            retention: RetentionConfig {
                retention_ms: args
                    .retention_ms
                    .or(file.retention.retention_ms)
                    .unwrap_or(DEFAULT_RETENTION_MS),
                retention_bytes: args
                    .retention_bytes
                    .or(file.retention.retention_bytes)
                    .unwrap_or(DEFAULT_RETENTION_BYTES),
                retention_check_interval_ms: args
                    .retention_check_interval_ms
                    .or(file.retention.retention_check_interval_ms)
                    .unwrap_or(DEFAULT_RETENTION_CHECK_INTERVAL_MS),
            },
            segment_cache_capacity: args
                .segment_cache_capacity
                .or(file.segment_cache_capacity)
                .unwrap_or(DEFAULT_SEGMENT_CACHE_CAPACITY),
        }
    }

    /// Defaults rooted at `base_dir`; handy for tests and embedded use.
    pub fn with_base_dir(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            listen_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }

    /// The storage-layer view of this configuration
    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            segment: SegmentConfig {
                segment_max_bytes: self.storage.segment_max_bytes,
                index_max_bytes: self.storage.index_max_bytes,
                index_interval_bytes: self.storage.index_interval_bytes,
            },
            retention_ms: self.retention.retention_ms,
            retention_bytes: self.retention.retention_bytes,
        }
    }

    /// Reject configurations the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            StreamlogError::Config(format!("invalid listen_addr '{}': {e}", self.listen_addr))
        })?;

        if self.topic.is_empty() || self.topic.contains(['/', '-']) {
            return Err(StreamlogError::Config(format!(
                "invalid topic '{}': must be non-empty and free of '-' and '/'",
                self.topic
            )));
        }
        if self.partition_id < 0 {
            return Err(StreamlogError::Config(format!(
                "invalid partition_id {}",
                self.partition_id
            )));
        }
        if self.storage.segment_max_bytes < 1024 {
            return Err(StreamlogError::Config(format!(
                "segment_max_bytes {} too small (minimum 1024)",
                self.storage.segment_max_bytes
            )));
        }
        if self.storage.index_max_bytes < 8 {
            return Err(StreamlogError::Config(format!(
                "index_max_bytes {} cannot hold a single entry",
                self.storage.index_max_bytes
            )));
        }
        if self.segment_cache_capacity == 0 {
            return Err(StreamlogError::Config(
                "segment_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.retention.retention_check_interval_ms <= 0 {
            return Err(StreamlogError::Config(format!(
                "retention_check_interval_ms {} must be positive",
                self.retention.retention_check_interval_ms
            )));
        }
        Ok(())
    }
}
