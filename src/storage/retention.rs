//! Background retention cleaner
//!
//! A single task owns the list of registered partitions and periodically
//! invokes each partition's retention pass. Registration is dynamic and
//! concurrent-safe; each tick works on a snapshot of the registration list
//! so partitions can be added while a pass is running. The loop is
//! cancellable only at tick boundaries via the stop signal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::storage::partition::Partition;

/// Default interval between retention passes (5 minutes)
pub const DEFAULT_RETENTION_CHECK_INTERVAL_MS: i64 = 5 * 60 * 1000;

/// Cleaner configuration
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Milliseconds between retention passes
    pub retention_check_interval_ms: i64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            retention_check_interval_ms: DEFAULT_RETENTION_CHECK_INTERVAL_MS,
        }
    }
}

/// Periodic retention task over a set of registered partitions
pub struct RetentionCleaner {
    partitions: Mutex<Vec<Arc<Partition>>>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionCleaner {
    /// Create a cleaner; call [`start`](Self::start) to begin ticking.
    pub fn new(config: CleanerConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            partitions: Mutex::new(Vec::new()),
            interval: Duration::from_millis(config.retention_check_interval_ms.max(1) as u64),
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// Register a partition for retention. May be called at any time.
    pub fn register(&self, partition: Arc<Partition>) {
        debug!(
            topic = %partition.topic(),
            partition = partition.id(),
            "partition registered for retention"
        );
        self.partitions.lock().push(partition);
    }

    /// Number of registered partitions
    pub fn partition_count(&self) -> usize {
        self.partitions.lock().len()
    }

    /// Spawn the periodic task.
    pub fn start(self: &Arc<Self>) {
        let cleaner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleaner.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; consume
            // it so passes start one full interval after start().
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cleaner.run_once();
                    }
                    _ = shutdown.changed() => {
                        debug!("retention cleaner stopping");
                        return;
                    }
                }
            }
        });

        *self.task.lock() = Some(handle);
    }

    /// Run a single retention pass over a snapshot of the registered
    /// partitions. Returns the number of segments deleted.
    pub fn run_once(&self) -> usize {
        let partitions: Vec<Arc<Partition>> = self.partitions.lock().clone();

        let mut deleted = 0;
        for partition in partitions {
            deleted += partition.delete_old_segments();
        }

        if deleted > 0 {
            info!(deleted, "retention pass complete");
        }
        deleted
    }

    /// Signal the task to stop and await its completion.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    use crate::storage::cache::SegmentCache;
    use crate::storage::partition::PartitionConfig;
    use crate::storage::segment::SegmentConfig;

    fn open_partition(dir: &std::path::Path) -> Arc<Partition> {
        let cache = Arc::new(SegmentCache::new(4));
        let config = PartitionConfig {
            segment: SegmentConfig {
                segment_max_bytes: 4096,
                index_max_bytes: 256,
                index_interval_bytes: 0,
            },
            retention_ms: -1,
            retention_bytes: -1,
        };
        Arc::new(Partition::open(dir, "events", 0, config, cache).unwrap())
    }

    #[tokio::test]
    async fn test_start_stop() {
        let cleaner = RetentionCleaner::new(CleanerConfig {
            retention_check_interval_ms: 20,
        });
        cleaner.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cleaner.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let cleaner = RetentionCleaner::new(CleanerConfig::default());
        cleaner.stop().await;
    }

    #[tokio::test]
    async fn test_register() {
        let dir = tempdir().unwrap();
        let cleaner = RetentionCleaner::new(CleanerConfig::default());

        assert_eq!(cleaner.partition_count(), 0);
        cleaner.register(open_partition(dir.path()));
        assert_eq!(cleaner.partition_count(), 1);
    }

    #[tokio::test]
    async fn test_run_once_with_infinite_retention_is_noop() {
        let dir = tempdir().unwrap();
        let cleaner = RetentionCleaner::new(CleanerConfig::default());
        cleaner.register(open_partition(dir.path()));

        assert_eq!(cleaner.run_once(), 0);
    }
}
