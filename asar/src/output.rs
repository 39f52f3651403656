//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use asar_core::{BuildStats, EntryFailure, ExtractReport, Node};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Check if JSON mode is enabled.
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write output using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write raw bytes to stdout regardless of format.
    pub fn write_raw(&self, data: &[u8]) -> Result<()> {
        let mut handle = self.stdout.lock();
        handle.write_all(data)?;
        handle.flush()?;
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error message with its causes.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `pack` command.
#[derive(Debug, Serialize)]
pub struct PackOutput {
    pub success: bool,
    pub result_code: u8,
    pub source: String,
    pub archive: String,
    pub files_packed: usize,
    pub files_unpacked: usize,
    pub blob_size: u64,
    pub header_size: u32,
}

impl PackOutput {
    pub fn new(source: String, archive: String, stats: &BuildStats) -> Self {
        Self {
            success: true,
            result_code: 0,
            source,
            archive,
            files_packed: stats.files_packed,
            files_unpacked: stats.files_unpacked,
            blob_size: stats.blob_size,
            header_size: stats.header_size,
        }
    }
}

/// Entry information for `list` command.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub path: String,
    pub kind: &'static str,
    pub unpacked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl EntryInfo {
    pub fn new(path: String, node: &Node) -> Self {
        let mut info = Self {
            path,
            kind: node.kind_str(),
            unpacked: node.is_unpacked(),
            size: None,
            offset: None,
            executable: None,
            link: None,
        };
        match node {
            Node::File(file) => {
                info.size = Some(file.size);
                info.offset = file.offset();
                info.executable = Some(file.executable);
            }
            Node::Link(link) => info.link = Some(link.link.clone()),
            Node::Directory(_) => {}
        }
        info
    }

    /// One `list --long` line: pack state, kind, size, path.
    pub fn long_line(&self) -> String {
        let state = if self.unpacked { "unpack" } else { "pack" };
        let size = self
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &self.link {
            Some(target) => format!(
                "{:<6} {:<9} {:>12} {} -> {}",
                state, self.kind, size, self.path, target
            ),
            None => format!("{:<6} {:<9} {:>12} {}", state, self.kind, size, self.path),
        }
    }
}

/// Output for `list` command.
#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub success: bool,
    pub result_code: u8,
    pub archive: String,
    pub entries: Vec<EntryInfo>,
}

/// A failed entry reported by `extract`.
#[derive(Debug, Clone, Serialize)]
pub struct FailureInfo {
    pub path: String,
    pub error: String,
}

impl From<&EntryFailure> for FailureInfo {
    fn from(failure: &EntryFailure) -> Self {
        Self {
            path: failure.path.clone(),
            error: failure.error.to_string(),
        }
    }
}

/// Entry counts of a successful `extract`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExtractedCounts {
    pub directories: usize,
    pub files: usize,
    pub links: usize,
}

impl From<ExtractReport> for ExtractedCounts {
    fn from(report: ExtractReport) -> Self {
        Self {
            directories: report.directories,
            files: report.files,
            links: report.links,
        }
    }
}

/// Output for `extract` command.
#[derive(Debug, Serialize)]
pub struct ExtractOutput {
    pub success: bool,
    pub result_code: u8,
    pub archive: String,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ExtractedCounts>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureInfo>,
}

/// Output for `header` command.
#[derive(Debug, Serialize)]
pub struct HeaderOutput {
    pub success: bool,
    pub result_code: u8,
    pub archive: String,
    pub header_size: u32,
    pub header: serde_json::Value,
}

/// Output for `extract-file --output`.
#[derive(Debug, Serialize)]
pub struct ExtractFileOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub size: u64,
    pub output: String,
}
