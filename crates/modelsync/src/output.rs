//! Output formatting: table, JSON, YAML.
//!
//! Renders data in the format selected by `--output`. Tables use `tabled`,
//! structured formats use serde.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use modelsync_core::OperationKind;

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Operation kind label, colored by effect when enabled.
pub fn kind_label(kind: OperationKind, color: bool) -> String {
    if !color {
        return kind.to_string();
    }
    match kind {
        OperationKind::Create => kind.green().to_string(),
        OperationKind::Update => kind.yellow().to_string(),
        OperationKind::Delete => kind.red().to_string(),
    }
}

/// Section heading for multi-part table output.
pub fn heading(text: &str, color: bool) -> String {
    if color {
        text.bold().to_string()
    } else {
        text.to_owned()
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a serializable value in the chosen format.
///
/// Table rendering uses `table_fn`, since each command lays out its own
/// rows; structured formats serialize `data` directly.
pub fn render<T>(format: OutputFormat, data: &T, table_fn: impl FnOnce(&T) -> String) -> Result<String, CliError>
where
    T: Serialize,
{
    match format {
        OutputFormat::Table => Ok(table_fn(data)),
        OutputFormat::Json => serde_json::to_string_pretty(data).map_err(render_err),
        OutputFormat::JsonCompact => serde_json::to_string(data).map_err(render_err),
        OutputFormat::Yaml => serde_yaml::to_string(data).map_err(render_err),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Table helpers ────────────────────────────────────────────────────

pub fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Two-column key/value row for summary tables.
#[derive(Tabled)]
pub struct FieldRow {
    #[tabled(rename = "Field")]
    pub field: &'static str,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl FieldRow {
    pub fn new(field: &'static str, value: impl ToString) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

fn render_err(err: impl std::fmt::Display) -> CliError {
    CliError::Render(err.to_string())
}
