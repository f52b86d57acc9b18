//! Shared output layer for pretty/text/JSON parity across all CLI commands.
//!
//! Every command handler receives an [`OutputMode`] and formats its output
//! accordingly: pretty output for humans, compact text for scripts, or stable
//! JSON. The mode itself is resolved by `timeline_core::config` from the
//! `--json` flag, the `FORMAT` env var, the user config and TTY detection.

use serde::Serialize;
use std::io::{self, Write};
use timeline_core::ErrorCode;
use timeline_core::history::PartitionViolation;
use timeline_core::inconsistency::InconsistencyLogError;
use timeline_core::lock::LockError;
use timeline_core::{ReconstructError, StoreError};

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<18} {}", format!("{key}:"), value.as_ref())
}

/// The three output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-optimized output (sections, visual framing).
    Pretty,
    /// Plain `key value` lines and tab-separated rows.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    /// Map a resolved mode name (`pretty`, `text`, `json`) to a mode.
    pub fn from_resolved(name: &str) -> Self {
        match name {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Text,
        }
    }

    /// Returns `true` if JSON output was requested.
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// A structured error with optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Human-readable error message.
    pub message: String,
    /// Optional suggestion for how to fix the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Machine-readable error code (`E####`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    /// Create a simple error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }

    fn with_code(message: String, code: ErrorCode) -> Self {
        Self {
            message,
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
        }
    }
}

/// Find the first typed library error in the chain and take its code.
pub fn error_code_of(error: &anyhow::Error) -> Option<ErrorCode> {
    if error.downcast_ref::<crate::cmd::ConfigInvalid>().is_some() {
        return Some(ErrorCode::ConfigParseError);
    }
    error.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<ReconstructError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<StoreError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<LockError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<InconsistencyLogError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<PartitionViolation>() {
            Some(e.code())
        } else {
            cause
                .downcast_ref::<crate::cmd::NotInitialized>()
                .map(|_| ErrorCode::NotInitialized)
        }
    })
}

impl From<&anyhow::Error> for CliError {
    fn from(error: &anyhow::Error) -> Self {
        let message = format!("{error:#}");
        match error_code_of(error) {
            Some(code) => Self::with_code(message, code),
            None => Self::new(message),
        }
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({
                "error": error,
            });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            writeln!(out, "error: {}", error.message)?;
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

/// Format a microsecond instant as RFC 3339, falling back to the raw number.
pub fn format_instant(micros: i64) -> String {
    chrono::DateTime::from_timestamp_micros(micros)
        .map_or_else(|| micros.to_string(), |at| at.to_rfc3339())
}
