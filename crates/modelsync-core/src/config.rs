// ── Runtime sync configuration ──
//
// These types tune the cache, the bus and the write path. They never touch
// disk: the CLI (through modelsync-config) builds a `SyncConfig` and hands
// it in.

use std::time::Duration;

use crate::error::CoreError;

/// Sizing of the entity cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of slots to preallocate.
    pub initial_capacity: usize,
    /// Shard count of the underlying map. Must be a power of two greater
    /// than one; `None` keeps the map's default.
    pub shard_amount: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            shard_amount: None,
        }
    }
}

/// Delivery tuning for the change-notification bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// An immediate callback running longer than this is logged as slow.
    pub slow_callback_threshold: Duration,
    /// A dispatch queue holding more pending jobs than this logs a warning.
    pub queue_warning_threshold: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            slow_callback_threshold: Duration::from_millis(50),
            queue_warning_threshold: 10_000,
        }
    }
}

/// Write-path tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConfig {
    /// Upper bound on a single `SyncHub::write` call.
    pub timeout: Duration,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration of one sync hub.
///
/// Built by the CLI or an embedding application and passed to
/// `SyncHub::open` -- the core never reads config files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    pub cache: CacheConfig,
    pub bus: BusConfig,
    pub write: WriteConfig,
}

impl SyncConfig {
    /// Reject settings the cache or bus cannot honour.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(shards) = self.cache.shard_amount {
            if shards < 2 || !shards.is_power_of_two() {
                return Err(CoreError::Config {
                    message: format!("cache.shard_amount must be a power of two greater than one, got {shards}"),
                });
            }
        }
        if self.bus.slow_callback_threshold.is_zero() {
            return Err(CoreError::Config {
                message: "bus.slow_callback_threshold must be non-zero".into(),
            });
        }
        if self.bus.queue_warning_threshold == 0 {
            return Err(CoreError::Config {
                message: "bus.queue_warning_threshold must be non-zero".into(),
            });
        }
        if self.write.timeout.is_zero() {
            return Err(CoreError::Config {
                message: "write.timeout must be non-zero".into(),
            });
        }
        Ok(())
    }
}
