//! Configuration for modelsync tools.
//!
//! TOML file + environment loading via figment, and translation to
//! `modelsync_core::SyncConfig`. The core never reads files; binaries load a
//! [`Config`] here and hand the result of [`Config::to_sync_config`] to
//! `SyncHub::open`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use modelsync_core::{BusConfig, CacheConfig, CoreError, SyncConfig, WriteConfig};

/// Environment variable prefix; nested keys are separated by `__`
/// (`MODELSYNC_WRITE__TIMEOUT_SECS=5`).
pub const ENV_PREFIX: &str = "MODELSYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("config file already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub bus: BusSection,

    #[serde(default)]
    pub write: WriteSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Power of two greater than one; unset keeps the map's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_amount: Option<usize>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            shard_amount: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BusSection {
    /// Immediate callbacks slower than this many milliseconds are logged.
    #[serde(default = "default_slow_callback_ms")]
    pub slow_callback_ms: u64,

    /// Dispatch queue backlog that triggers a warning.
    #[serde(default = "default_queue_warning")]
    pub queue_warning: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            slow_callback_ms: default_slow_callback_ms(),
            queue_warning: default_queue_warning(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WriteSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WriteSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when neither `-v` nor `RUST_LOG` is given.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_initial_capacity() -> usize {
    CacheConfig::default().initial_capacity
}
fn default_slow_callback_ms() -> u64 {
    u64::try_from(BusConfig::default().slow_callback_threshold.as_millis()).unwrap_or(u64::MAX)
}
fn default_queue_warning() -> usize {
    BusConfig::default().queue_warning_threshold
}
fn default_timeout_secs() -> u64 {
    WriteConfig::default().timeout.as_secs()
}
fn default_filter() -> String {
    "warn".into()
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Build the runtime configuration, rejecting values the core cannot
    /// honour.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        if self.bus.slow_callback_ms == 0 {
            return Err(ConfigError::Validation {
                field: "bus.slow_callback_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.write.timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "write.timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let sync = SyncConfig {
            cache: CacheConfig {
                initial_capacity: self.cache.initial_capacity,
                shard_amount: self.cache.shard_amount,
            },
            bus: BusConfig {
                slow_callback_threshold: Duration::from_millis(self.bus.slow_callback_ms),
                queue_warning_threshold: self.bus.queue_warning,
            },
            write: WriteConfig {
                timeout: Duration::from_secs(self.write.timeout_secs),
            },
        };
        sync.validate().map_err(|err| match err {
            CoreError::Config { message } => ConfigError::Validation {
                field: "config".into(),
                reason: message,
            },
            other => ConfigError::Validation {
                field: "config".into(),
                reason: other.to_string(),
            },
        })?;
        Ok(sync)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "modelsync", "modelsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("modelsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the Config from `path` + environment. A missing file is not an
/// error: defaults and environment still apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Write a default config to `path` unless a file is already there.
pub fn init_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    save_config_to(&Config::default(), path)
}
