//! Archive construction: tree building, offset bookkeeping, and writing.

use crate::archive::{sidecar_dir, write_header};
use crate::error::{Error, Result};
use crate::integrity::{FileIntegrity, IntegrityConfig};
use crate::node::{DirectoryNode, FileLocation, FileNode, Node};
use crate::sanitize;
use crate::tree::{split_parent, split_path};
use crate::walk::{CrawlOptions, CrawledEntry, EntryKind, crawl};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Predicate over a `/`-separated path relative to the source root.
pub type PathPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Options for building an archive.
#[derive(Default)]
pub struct CreateOptions {
    /// Matched against a file's containing directory (empty for the root).
    /// A match stores the file in the sidecar instead of the blob.
    pub unpack: Option<PathPredicate>,
    /// Matched against a directory's path. A match marks the directory
    /// force-unpack, which applies to everything below it.
    pub unpack_dir: Option<PathPredicate>,
    pub integrity: IntegrityConfig,
    pub crawl: CrawlOptions,
}

impl CreateOptions {
    pub fn with_unpack(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.unpack = Some(Box::new(predicate));
        self
    }

    pub fn with_unpack_dir(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.unpack_dir = Some(Box::new(predicate));
        self
    }
}

impl fmt::Debug for CreateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateOptions")
            .field("unpack", &self.unpack.is_some())
            .field("unpack_dir", &self.unpack_dir.is_some())
            .field("integrity", &self.integrity)
            .field("crawl", &self.crawl)
            .finish()
    }
}

/// Summary of a written archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub files_packed: usize,
    pub files_unpacked: usize,
    /// Total bytes in the payload blob.
    pub blob_size: u64,
    pub header_size: u32,
}

/// A file recorded in the tree whose bytes are not yet written.
#[derive(Debug)]
struct PendingFile {
    source: PathBuf,
    archive_path: String,
    size: u64,
    unpacked: bool,
}

/// Incremental archive builder.
///
/// Entries are inserted in top-down order; packed files are laid out in the
/// blob in insertion order.
pub struct ArchiveBuilder {
    src: PathBuf,
    root: DirectoryNode,
    files: Vec<PendingFile>,
    blob_size: u64,
    options: CreateOptions,
}

impl ArchiveBuilder {
    /// Start an empty archive for the tree rooted at `src`.
    pub fn new(src: impl AsRef<Path>, options: CreateOptions) -> Result<Self> {
        Ok(Self {
            src: std::path::absolute(src.as_ref())?,
            root: DirectoryNode::default(),
            files: Vec::new(),
            blob_size: 0,
            options,
        })
    }

    /// Absolute source root.
    pub fn src(&self) -> &Path {
        &self.src
    }

    /// The tree built so far.
    pub fn header(&self) -> &DirectoryNode {
        &self.root
    }

    /// Insert one crawled path, classifying it first if needed.
    pub fn insert(&mut self, entry: &CrawledEntry) -> Result<()> {
        let kind = entry
            .kind
            .or_else(|| EntryKind::detect(&entry.path))
            .ok_or_else(|| Error::unsupported_file_type(&entry.path))?;

        match kind {
            EntryKind::Directory => {
                let rel = self.relative_path(&entry.path)?;
                let unpack = self
                    .options
                    .unpack_dir
                    .as_ref()
                    .is_some_and(|matches| matches(&rel));
                self.insert_directory(&entry.path, unpack)
            }
            EntryKind::File => self.insert_file(&entry.path),
            EntryKind::Link => Err(Error::unsupported_file_type(&entry.path)),
        }
    }

    /// Insert a directory. With `unpack`, every file below it is unpacked,
    /// including files that were inserted earlier.
    pub fn insert_directory(&mut self, source: &Path, unpack: bool) -> Result<()> {
        let rel = self.relative_path(source)?;
        let dir = self.root.open_directory(&rel)?;

        if unpack && !dir.unpacked {
            dir.unpacked = true;
            tracing::debug!(path = %rel, "directory marked force-unpack");
            self.unpack_descendants(&rel);
        }
        Ok(())
    }

    /// Insert a regular file, hashing it and assigning its blob offset.
    pub fn insert_file(&mut self, source: &Path) -> Result<()> {
        let rel = self.relative_path(source)?;
        let (parent, _) =
            split_parent(&rel).ok_or_else(|| Error::invalid_entry(&rel, "path has no file name"))?;
        let rel_dir = parent.join("/");

        let unpack = self
            .options
            .unpack
            .as_ref()
            .is_some_and(|matches| matches(&rel_dir))
            || self.inherits_unpack(&parent);

        let metadata = fs::metadata(source)?;
        let size = metadata.len();
        if !unpack && size > u64::from(u32::MAX) {
            return Err(Error::size_limit(source, size));
        }

        let integrity = FileIntegrity::from_file(source, &self.options.integrity)?;
        let location = if unpack {
            FileLocation::Unpacked
        } else {
            FileLocation::Packed {
                offset: self.blob_size,
            }
        };
        let node = Node::File(FileNode {
            size,
            location,
            executable: is_executable(&metadata),
            integrity,
        });

        let mut inserted = false;
        self.root.open_entry(&rel, || {
            inserted = true;
            node
        })?;
        if !inserted {
            return Err(Error::invalid_entry(&rel, "entry already exists"));
        }

        if !unpack {
            self.blob_size += size;
        }
        tracing::debug!(path = %rel, size, unpack, "added file");

        self.files.push(PendingFile {
            source: source.to_path_buf(),
            archive_path: rel,
            size,
            unpacked: unpack,
        });
        Ok(())
    }

    /// Write the container to `dest` and unpacked files to its sidecar.
    pub fn write(self, dest: &Path) -> Result<BuildStats> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(dest)?);
        let header_size = write_header(&mut writer, &self.root)?;

        let sidecar = sidecar_dir(dest);
        let mut stats = BuildStats {
            files_packed: 0,
            files_unpacked: 0,
            blob_size: self.blob_size,
            header_size,
        };

        for pending in &self.files {
            if pending.unpacked {
                let target = sanitize::join_within(&sidecar, &pending.archive_path)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&pending.source, &target)?;
                stats.files_unpacked += 1;
            } else {
                let mut source = File::open(&pending.source)?.take(pending.size + 1);
                let copied = io::copy(&mut source, &mut writer)?;
                if copied != pending.size {
                    return Err(Error::invalid_entry(
                        &pending.archive_path,
                        format!(
                            "source changed during build: expected {} bytes, found {}",
                            pending.size, copied
                        ),
                    ));
                }
                stats.files_packed += 1;
            }
        }
        writer.flush()?;

        tracing::info!(
            archive = %dest.display(),
            packed = stats.files_packed,
            unpacked = stats.files_unpacked,
            blob_size = stats.blob_size,
            "archive written"
        );
        Ok(stats)
    }

    /// `/`-separated path of `path` relative to the source root.
    fn relative_path(&self, path: &Path) -> Result<String> {
        let absolute = std::path::absolute(path)?;
        let rel = absolute.strip_prefix(&self.src).map_err(|_| {
            Error::invalid_entry(
                path.display().to_string(),
                format!("not inside {}", self.src.display()),
            )
        })?;

        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| {
                        Error::invalid_entry(path.display().to_string(), "path is not valid UTF-8")
                    })?;
                    segments.push(name);
                }
                Component::CurDir => {}
                _ => {
                    return Err(Error::invalid_entry(
                        path.display().to_string(),
                        "unexpected path component",
                    ));
                }
            }
        }
        Ok(segments.join("/"))
    }

    /// True if the root or any existing directory along `parent` is force-unpack.
    fn inherits_unpack(&self, parent: &[&str]) -> bool {
        let mut dir = &self.root;
        if dir.unpacked {
            return true;
        }
        for segment in parent {
            match dir.files.get(*segment).and_then(Node::as_directory) {
                Some(child) if child.unpacked => return true,
                Some(child) => dir = child,
                None => return false,
            }
        }
        false
    }

    /// Move already-inserted files below `rel` out of the blob.
    fn unpack_descendants(&mut self, rel: &str) {
        let prefix: Vec<&str> = split_path(rel).collect();
        let mut changed = false;

        for pending in &mut self.files {
            if pending.unpacked {
                continue;
            }
            let mut segments = split_path(&pending.archive_path);
            if !prefix.iter().all(|p| segments.next() == Some(*p)) {
                continue;
            }

            pending.unpacked = true;
            changed = true;
            if let Some(Node::File(file)) = self.root.get_mut(&pending.archive_path) {
                file.location = FileLocation::Unpacked;
            }
        }

        if changed {
            self.relayout();
        }
    }

    /// Reassign offsets of packed files in insertion order.
    fn relayout(&mut self) {
        let mut offset = 0;
        for pending in &self.files {
            if pending.unpacked {
                continue;
            }
            if let Some(Node::File(file)) = self.root.get_mut(&pending.archive_path) {
                file.location = FileLocation::Packed { offset };
            }
            offset += pending.size;
        }
        self.blob_size = offset;
    }
}

impl fmt::Debug for ArchiveBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveBuilder")
            .field("src", &self.src)
            .field("files", &self.files.len())
            .field("blob_size", &self.blob_size)
            .finish()
    }
}

/// Crawl `src` and write it as an archive at `dest`.
///
/// `dest` and its sidecar are skipped if they live inside `src`.
pub fn create_archive(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: CreateOptions,
) -> Result<BuildStats> {
    let dest = dest.as_ref();
    let builder = ArchiveBuilder::new(src, options)?;

    let dest_abs = std::path::absolute(dest)?;
    let sidecar_abs = sidecar_dir(&dest_abs);
    let entries: Vec<CrawledEntry> = crawl(builder.src(), &builder.options.crawl)?
        .into_iter()
        .filter(|entry| {
            !entry.path.starts_with(&dest_abs) && !entry.path.starts_with(&sidecar_abs)
        })
        .collect();

    build(builder, dest, &entries)
}

/// Write an archive from a caller-supplied, top-down ordered entry list.
pub fn create_archive_from_entries(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    entries: &[CrawledEntry],
    options: CreateOptions,
) -> Result<BuildStats> {
    let builder = ArchiveBuilder::new(src, options)?;
    build(builder, dest.as_ref(), entries)
}

fn build(mut builder: ArchiveBuilder, dest: &Path, entries: &[CrawledEntry]) -> Result<BuildStats> {
    for entry in entries {
        builder.insert(entry)?;
    }
    builder.write(dest)
}

/// Whether any execute bit is set.
#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

/// Whether any execute bit is set (Windows fallback).
#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
