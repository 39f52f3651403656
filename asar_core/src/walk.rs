//! Filesystem crawling: produces the ordered path list the builder consumes.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Kind of a crawled path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Link,
}

impl EntryKind {
    /// Classify a path without following symlinks.
    ///
    /// Returns `None` for missing paths and special files (sockets, fifos, devices).
    pub fn detect(path: &Path) -> Option<Self> {
        let file_type = fs::symlink_metadata(path).ok()?.file_type();
        Self::from_file_type(file_type)
    }

    fn from_file_type(file_type: fs::FileType) -> Option<Self> {
        if file_type.is_symlink() {
            Some(EntryKind::Link)
        } else if file_type.is_file() {
            Some(EntryKind::File)
        } else if file_type.is_dir() {
            Some(EntryKind::Directory)
        } else {
            None
        }
    }
}

/// One path handed to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledEntry {
    pub path: PathBuf,
    /// `None` lets the builder classify the path itself.
    pub kind: Option<EntryKind>,
}

impl CrawledEntry {
    pub fn new(path: impl Into<PathBuf>, kind: EntryKind) -> Self {
        Self {
            path: path.into(),
            kind: Some(kind),
        }
    }

    pub fn unclassified(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: None,
        }
    }
}

/// Crawler settings.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Skip paths excluded by `.gitignore` / `.ignore` files.
    pub respect_ignore_files: bool,
}

/// List every path below `dir` (excluding `dir` itself).
///
/// Parents always precede their children and siblings are sorted by name.
/// Symlinks are reported as [`EntryKind::Link`] and never descended into, so
/// nothing inside a symlinked directory is listed.
pub fn crawl(dir: &Path, options: &CrawlOptions) -> Result<Vec<CrawledEntry>> {
    if !dir.is_dir() {
        return Err(Error::Io {
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Directory does not exist: {}", dir.display()),
            ),
        });
    }

    let walker = ignore::WalkBuilder::new(dir)
        .standard_filters(false) // Include hidden files
        .git_ignore(options.respect_ignore_files)
        .ignore(options.respect_ignore_files)
        .require_git(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry?;

        // Skip the directory itself
        if entry.depth() == 0 {
            continue;
        }

        let kind = entry.file_type().and_then(EntryKind::from_file_type);
        entries.push(CrawledEntry {
            path: entry.into_path(),
            kind,
        });
    }

    tracing::debug!(root = %dir.display(), entries = entries.len(), "crawled source tree");
    Ok(entries)
}
