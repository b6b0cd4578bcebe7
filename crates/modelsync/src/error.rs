//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use modelsync_config::ConfigError;
use modelsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Model ────────────────────────────────────────────────────────
    #[error("Entity {key} not found")]
    #[diagnostic(
        code(modelsync::not_found),
        help("Seed the entity in the script's `cache` section or create it with a `create` edit.")
    )]
    NotFound { key: String },

    #[error("Entity {iid} is already {state}")]
    #[diagnostic(code(modelsync::duplicate))]
    Duplicate { iid: Uuid, state: &'static str },

    #[error("Revision conflict on {iid}: expected {expected}, store has {actual}")]
    #[diagnostic(
        code(modelsync::conflict),
        help("Another writer moved the entity on. Reload and re-apply the edit.")
    )]
    Conflict { iid: Uuid, expected: u64, actual: u64 },

    // ── Write ────────────────────────────────────────────────────────
    #[error("Write failed: {message}")]
    #[diagnostic(code(modelsync::write_failed))]
    WriteFailed { message: String },

    #[error("Write timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(modelsync::timeout),
        help("Raise `write.timeout_secs` in the config file or MODELSYNC_WRITE__TIMEOUT_SECS.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("Sync core error: {message}")]
    #[diagnostic(code(modelsync::core))]
    Core { message: String },

    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid input at line {line} of {}: {reason}", .path.display())]
    #[diagnostic(
        code(modelsync::input),
        help("Each feed line is a JSON object with an `op` of upsert, remove or sync.")
    )]
    Input {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid script {}: {source}", .path.display())]
    #[diagnostic(
        code(modelsync::script),
        help("A script is a JSON object with `cache` (records) and `edits` (set, create, delete, link).")
    )]
    Script {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(modelsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists")]
    #[diagnostic(
        code(modelsync::config_exists),
        help("Use --force to overwrite it.\nPath: {path}")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(modelsync::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(modelsync::toml))]
    Toml(#[from] toml::ser::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(modelsync::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::Duplicate { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Input { .. }
            | Self::Script { .. }
            | Self::Validation { .. }
            | Self::ConfigExists { .. } => exit_code::USAGE,
            Self::Config(err) if matches!(**err, ConfigError::Validation { .. }) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::AlreadyExists { path } => Self::ConfigExists {
                path: path.display().to_string(),
            },
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { key } => Self::NotFound {
                key: key.to_string(),
            },

            CoreError::AlreadyCached { iid } => Self::Duplicate {
                iid,
                state: "cached",
            },

            CoreError::AlreadyStaged { iid } => Self::Duplicate {
                iid,
                state: "staged",
            },

            CoreError::Conflict {
                iid,
                expected,
                actual,
            } => Self::Conflict {
                iid,
                expected,
                actual,
            },

            CoreError::WriteFailed { message } => Self::WriteFailed { message },

            CoreError::WriteTimeout { timeout_ms } => Self::Timeout { timeout_ms },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            other => Self::Core {
                message: other.to_string(),
            },
        }
    }
}
