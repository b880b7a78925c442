use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Compact JSON of the result only
    #[default]
    Plain,
    /// Pretty JSON wrapped in a metadata envelope
    Annotated,
}

/// Identity of the tool and invocation that produced a result.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub analyzer: String,
    pub analyzer_version: String,
    pub datetime: DateTime<Utc>,
    pub command: String,
    pub arguments: serde_json::Value,
}

impl Metadata {
    pub fn new(
        analyzer: impl Into<String>,
        analyzer_version: impl Into<String>,
        command: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            analyzer: analyzer.into(),
            analyzer_version: analyzer_version.into(),
            datetime: Utc::now(),
            command: command.into(),
            arguments,
        }
    }
}

/// Envelope around a result for consumers expecting the analyzer-result schema.
#[derive(Debug, Serialize)]
pub struct AnnotatedOutput<'a, T: Serialize> {
    pub metadata: &'a Metadata,
    pub result: &'a T,
}

/// Format a result (single report or name-to-report map) as compact JSON.
pub fn format_plain<T: Serialize>(result: &T) -> Result<String> {
    serde_json::to_string(result).context("failed to serialize result")
}

/// Format a result wrapped in `metadata` as pretty JSON.
pub fn format_annotated<T: Serialize>(result: &T, metadata: &Metadata) -> Result<String> {
    let output = AnnotatedOutput { metadata, result };
    serde_json::to_string_pretty(&output).context("failed to serialize annotated result")
}

/// Write `result` to `out` in the given mode, followed by a newline.
pub fn write_result<W: Write, T: Serialize>(
    out: &mut W,
    result: &T,
    mode: OutputMode,
    metadata: &Metadata,
) -> Result<()> {
    let json = match mode {
        OutputMode::Plain => format_plain(result)?,
        OutputMode::Annotated => format_annotated(result, metadata)?,
    };
    writeln!(out, "{json}").context("failed to write result")?;
    out.flush().context("failed to flush result")?;
    Ok(())
}

/// Print `result` to standard output.
pub fn present<T: Serialize>(result: &T, mode: OutputMode, metadata: &Metadata) -> Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    write_result(&mut lock, result, mode, metadata)
}
