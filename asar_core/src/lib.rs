//! # Asar Core
//!
//! Reads and writes asar archives: a single container file holding a
//! directory tree, with file bytes concatenated into one payload blob.
//!
//! The container starts with a length-prefixed JSON header encoded as a
//! pickle (a 4-byte aligned, little-endian field buffer). Files can be left
//! out of the blob and stored verbatim in an `<archive>.unpacked/` sidecar
//! directory next to the container.
//!
//! ## Features
//!
//! - Byte-exact offsets into the payload blob, assigned in build order
//! - Per-file SHA-256 integrity records with per-block digests
//! - Unpack rules per directory, including force-unpack directories
//! - Symlink-aware path resolution inside the archive
//! - Extraction that refuses entries escaping the destination
//! - An explicit cache of parsed headers
//!
//! ## Example
//!
//! ```no_run
//! use asar_core::{ArchiveCache, CreateOptions, create_archive};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Pack a directory, leaving native modules outside the blob
//! let options = CreateOptions::default().with_unpack(|dir| dir.starts_with("native"));
//! let stats = create_archive("./app", "./dist/app.asar", options)?;
//! println!("Packed {} files", stats.files_packed);
//!
//! // Read one file back
//! let cache = ArchiveCache::new();
//! let archive = cache.load("./dist/app.asar")?;
//! let main = archive.read_file("index.js")?;
//! println!("{} bytes", main.len());
//!
//! // Extract everything
//! cache.extract_all("./dist/app.asar", "./restored")?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod builder;
mod cache;
mod error;
mod extract;
mod integrity;
mod node;
pub mod pickle;
mod sanitize;
mod tree;
mod walk;

pub use archive::{Archive, Header, read_header, sidecar_dir};
pub use builder::{
    ArchiveBuilder, BuildStats, CreateOptions, PathPredicate, create_archive,
    create_archive_from_entries,
};
pub use cache::ArchiveCache;
pub use error::{EntryFailure, Error, ExtractionError, Result};
pub use extract::{ExtractReport, extract_all};
pub use integrity::{Algorithm, DEFAULT_BLOCK_SIZE, FileIntegrity, IntegrityConfig};
pub use node::{DirectoryNode, FileLocation, FileNode, LinkNode, Node};
pub use pickle::{Pickle, PickleReader};
pub use tree::{Entries, ListPaths};
pub use walk::{CrawlOptions, CrawledEntry, EntryKind, crawl};
