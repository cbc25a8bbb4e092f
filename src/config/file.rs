//! TOML configuration file loading
//!
//! Every field is optional; anything absent falls back to the CLI value or
//! the built-in default. Example:
//!
//! ```toml
//! listen_addr = "127.0.0.1:9092"
//! data_dir = "/var/lib/streamlog"
//! topic = "events"
//!
//! [storage]
//! segment_max_bytes = 268435456
//! index_interval_bytes = 4096
//!
//! [retention]
//! retention_ms = 86400000
//! retention_bytes = -1
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StreamlogError};

/// Default config file name probed in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "streamlog.toml";

/// Parsed configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub listen_addr: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub topic: Option<String>,
    pub partition_id: Option<i32>,
    pub log_level: Option<String>,
    pub segment_cache_capacity: Option<usize>,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub retention: RetentionSection,
}

/// `[storage]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSection {
    pub segment_max_bytes: Option<u64>,
    pub index_max_bytes: Option<u64>,
    pub index_interval_bytes: Option<u64>,
}

/// `[retention]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionSection {
    pub retention_ms: Option<i64>,
    pub retention_bytes: Option<i64>,
    pub retention_check_interval_ms: Option<i64>,
}

impl ConfigFile {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamlogError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&contents)
            .map_err(|e| StreamlogError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Probe the default location; `None` when absent or unreadable.
    pub fn load_default() -> Option<Self> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.exists() {
            ConfigFile::load(path).ok()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("streamlog.toml");
        std::fs::write(
            &path,
            r#"
listen_addr = "127.0.0.1:9999"
topic = "events"

[storage]
segment_max_bytes = 1048576

[retention]
retention_ms = 60000
"#,
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.listen_addr.as_deref(), Some("127.0.0.1:9999"));
        assert_eq!(config.topic.as_deref(), Some("events"));
        assert_eq!(config.storage.segment_max_bytes, Some(1_048_576));
        assert_eq!(config.retention.retention_ms, Some(60_000));
        assert_eq!(config.retention.retention_bytes, None);
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("streamlog.toml");
        std::fs::write(&path, "").unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert!(config.listen_addr.is_none());
        assert!(config.storage.segment_max_bytes.is_none());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let result = ConfigFile::load(Path::new("/nonexistent/streamlog.toml"));
        assert!(matches!(result, Err(StreamlogError::Config(_))));
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("streamlog.toml");
        std::fs::write(&path, "listen_addr = [not toml").unwrap();

        assert!(matches!(
            ConfigFile::load(&path),
            Err(StreamlogError::Config(_))
        ));
    }
}
