//! Error types for asar_core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using asar_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or reading an archive.
///
/// Building and header parsing are fail-fast: the first error aborts the
/// operation. Bulk extraction reports through [`ExtractionError`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Malformed codec buffer or archive header.
    #[error("Decode error: {reason}")]
    Decode { reason: String },

    /// Tree structure does not allow the requested operation.
    #[error("Invalid entry {path}: {reason}")]
    InvalidEntry { path: String, reason: String },

    /// Source path is a symlink or of unknown type.
    #[error("Unsupported file type: {path}")]
    UnsupportedFileType { path: PathBuf },

    /// Packed file too large for the wire format.
    #[error("{path}: file size {size} exceeds the 4 GiB limit for packed files")]
    SizeLimit { path: PathBuf, size: u64 },

    /// Resolved path leaves the directory it must stay inside.
    #[error("{path}: resolves to {target}, outside of {root}")]
    PathEscape {
        path: String,
        target: String,
        root: PathBuf,
    },

    /// Path not present in the archive.
    #[error("\"{path}\" was not found in this archive")]
    EntryNotFound { path: String },

    /// Path resolved to a directory or symlink where a file was expected.
    #[error("Not a file: {path}")]
    NotAFile { path: String },
}

impl Error {
    /// Create a Decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Error::Decode {
            reason: reason.into(),
        }
    }

    /// Create an InvalidEntry error.
    pub fn invalid_entry(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidEntry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedFileType error.
    pub fn unsupported_file_type(path: impl Into<PathBuf>) -> Self {
        Error::UnsupportedFileType { path: path.into() }
    }

    /// Create a SizeLimit error.
    pub fn size_limit(path: impl Into<PathBuf>, size: u64) -> Self {
        Error::SizeLimit {
            path: path.into(),
            size,
        }
    }

    /// Create a PathEscape error.
    pub fn path_escape(
        path: impl Into<String>,
        target: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Error::PathEscape {
            path: path.into(),
            target: target.into(),
            root: root.into(),
        }
    }

    /// Create an EntryNotFound error.
    pub fn entry_not_found(path: impl Into<String>) -> Self {
        Error::EntryNotFound { path: path.into() }
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Error::NotAFile { path: path.into() }
    }

    /// Returns true for traversal-guard rejections.
    pub fn is_path_escape(&self) -> bool {
        matches!(self, Error::PathEscape { .. })
    }
}

// Additional From implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::decode(format!("invalid header JSON: {}", err))
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}

/// A single entry that failed during bulk extraction.
#[derive(Debug)]
pub struct EntryFailure {
    /// Absolute in-archive path of the entry (`/` for the destination root).
    pub path: String,
    /// Why the entry failed.
    pub error: Error,
}

/// Aggregate failure of a bulk extraction.
///
/// Every entry is attempted; entries that extracted successfully stay on disk.
#[derive(Debug, Default)]
pub struct ExtractionError {
    /// Failures in the order the entries were visited.
    pub failures: Vec<EntryFailure>,
}

impl ExtractionError {
    pub(crate) fn push(&mut self, path: impl Into<String>, error: Error) {
        self.failures.push(EntryFailure {
            path: path.into(),
            error,
        });
    }

    /// Number of failed entries.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True when no entry failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Iterate over the individual failures.
    pub fn iter(&self) -> impl Iterator<Item = &EntryFailure> {
        self.failures.iter()
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unable to extract {} entries:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.path, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExtractionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| &f.error as &(dyn std::error::Error + 'static))
    }
}
