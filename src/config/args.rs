//! Command-line arguments
//!
//! Every value is optional on the command line; resolution order is
//! CLI flag, then config file, then built-in default.

use std::path::PathBuf;

use clap::Parser;

/// Streamlog broker arguments
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "streamlog",
    about = "Single-node partitioned log broker speaking a minimal Kafka v2 batch wire format",
    version
)]
pub struct ServerArgs {
    /// TCP address to listen on (default 0.0.0.0:9092)
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Data directory holding partition directories (default ./data)
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Topic served by this broker (default "default")
    #[arg(long)]
    pub topic: Option<String>,

    /// Partition id (default 0)
    #[arg(long)]
    pub partition_id: Option<i32>,

    /// Log level when RUST_LOG is unset (default "info")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Segment pre-allocation size and full-trigger threshold in bytes
    #[arg(long)]
    pub segment_max_bytes: Option<u64>,

    /// Index file pre-allocation size in bytes
    #[arg(long)]
    pub index_max_bytes: Option<u64>,

    /// Log bytes between sparse index entries; 0 indexes only first batches
    #[arg(long)]
    pub index_interval_bytes: Option<u64>,

    /// Time-based retention horizon in milliseconds; -1 disables
    #[arg(long, allow_negative_numbers = true)]
    pub retention_ms: Option<i64>,

    /// Size-based retention limit in bytes; -1 means unlimited
    #[arg(long, allow_negative_numbers = true)]
    pub retention_bytes: Option<i64>,

    /// Interval between retention passes in milliseconds
    #[arg(long)]
    pub retention_check_interval_ms: Option<i64>,

    /// Open read-only segments kept by the LRU cache
    #[arg(long)]
    pub segment_cache_capacity: Option<usize>,
}
