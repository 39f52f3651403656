//! Container format: header block, payload blob, and bounded entry reads.
//!
//! ```text
//! [8 bytes ] pickle { u32 N }
//! [N bytes ] pickle { string header_json }
//! [...     ] payload blob, packed files concatenated in build order
//! ```
//!
//! A packed file with offset `o` lives at `8 + N + o` in the container.
//! Unpacked files live in the `<archive>.unpacked/` sidecar directory.

use crate::error::{Error, Result};
use crate::node::{FileLocation, FileNode, Node};
use crate::pickle::Pickle;
use crate::sanitize;
use crate::tree::{Entries, ListPaths};
use serde::Serialize;
use std::ffi::OsString;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Size of the pickle that carries the header length.
const SIZE_PICKLE_LEN: u64 = 8;

/// Location of the sidecar directory for `archive`.
pub fn sidecar_dir(archive: &Path) -> PathBuf {
    let mut name = OsString::from(archive.as_os_str());
    name.push(".unpacked");
    PathBuf::from(name)
}

/// Encode `root` and write the size pickle plus header pickle.
///
/// Returns the header pickle length `N`.
pub(crate) fn write_header<W, T>(writer: &mut W, root: &T) -> Result<u32>
where
    W: Write,
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string(root)?;

    let mut header = Pickle::new();
    header.write_string(&json);
    let header_bytes = header.to_bytes();
    let header_size = u32::try_from(header_bytes.len())
        .map_err(|_| Error::decode("header exceeds 4 GiB"))?;

    let mut size = Pickle::new();
    size.write_u32(header_size);

    writer.write_all(&size.to_bytes())?;
    writer.write_all(&header_bytes)?;
    Ok(header_size)
}

/// A parsed header.
#[derive(Debug, Clone)]
pub struct Header {
    pub root: Node,
    /// Length `N` of the header pickle.
    pub header_size: u32,
}

/// Parse the header of the archive at `path`.
pub fn read_header(path: &Path) -> Result<Header> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut size_buf = [0u8; SIZE_PICKLE_LEN as usize];
    read_exact_or_decode(&mut file, &mut size_buf, "archive too short for header size")?;
    let header_size = Pickle::from_bytes(size_buf.to_vec()).reader().read_u32()?;

    if SIZE_PICKLE_LEN + u64::from(header_size) > file_len {
        return Err(Error::decode(format!(
            "header declares {} bytes but archive is {} bytes (truncated)",
            header_size, file_len
        )));
    }

    let mut header_buf = vec![0u8; header_size as usize];
    read_exact_or_decode(&mut file, &mut header_buf, "archive truncated inside header")?;
    let json = Pickle::from_bytes(header_buf).reader().read_string()?;

    let root: Node = serde_json::from_str(&json)?;
    if !root.is_directory() {
        return Err(Error::decode("header root is not a directory"));
    }

    tracing::debug!(archive = %path.display(), header_size, "parsed archive header");
    Ok(Header { root, header_size })
}

fn read_exact_or_decode<R: Read>(reader: &mut R, buf: &mut [u8], reason: &str) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::decode(reason)),
        Err(e) => Err(e.into()),
    }
}

/// An opened archive: immutable header plus the path to read entries from.
///
/// No file handle is held; every read opens the container for one bounded
/// operation.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    header_size: u32,
    root: Node,
}

impl Archive {
    /// Parse the header at `path` without consulting any cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().canonicalize()?;
        let Header { root, header_size } = read_header(&path)?;
        Ok(Self {
            path,
            header_size,
            root,
        })
    }

    /// Canonical path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    /// Root directory node.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Sidecar directory for unpacked files.
    pub fn sidecar_dir(&self) -> PathBuf {
        sidecar_dir(&self.path)
    }

    /// Resolve `path`; `None` if any segment is missing.
    pub fn get_node(&self, path: &str, follow_links: bool) -> Option<&Node> {
        self.root.get_node(path, follow_links)
    }

    /// Resolve `path` (following links) to a file node.
    pub fn get_file(&self, path: &str) -> Result<&FileNode> {
        self.resolve_file(path).map(|(_, file)| file)
    }

    fn resolve_file(&self, path: &str) -> Result<(String, &FileNode)> {
        let (segments, node) = self
            .root
            .resolve(path, true)
            .ok_or_else(|| Error::entry_not_found(path))?;
        match node {
            Node::File(file) => Ok((segments.join("/"), file)),
            _ => Err(Error::not_a_file(path)),
        }
    }

    /// Read the full contents of the file at `path`.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (resolved, file) = self.resolve_file(path)?;
        self.read_entry(&resolved, file)
    }

    /// Read the bytes of `file`, stored at in-archive path `path`.
    ///
    /// `path` is only used to locate unpacked files in the sidecar.
    pub fn read_entry(&self, path: &str, file: &FileNode) -> Result<Vec<u8>> {
        if file.size == 0 {
            return Ok(Vec::new());
        }

        match file.location {
            FileLocation::Unpacked => {
                let sidecar = sanitize::join_within(&self.sidecar_dir(), path)?;
                let data = std::fs::read(&sidecar)?;
                if data.len() as u64 != file.size {
                    return Err(Error::invalid_entry(
                        path,
                        format!(
                            "unpacked file is {} bytes, header records {}",
                            data.len(),
                            file.size
                        ),
                    ));
                }
                Ok(data)
            }
            FileLocation::Packed { offset } => self.read_packed(path, offset, file.size),
        }
    }

    fn read_packed(&self, path: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        let start = SIZE_PICKLE_LEN
            .checked_add(u64::from(self.header_size))
            .and_then(|base| base.checked_add(offset))
            .ok_or_else(|| Error::invalid_entry(path, "offset out of range"))?;
        let end = start
            .checked_add(size)
            .ok_or_else(|| Error::invalid_entry(path, "size out of range"))?;

        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        if end > file_len {
            return Err(Error::decode(format!(
                "archive truncated: {} needs bytes {}..{} of {}",
                path, start, end, file_len
            )));
        }

        let len = usize::try_from(size)
            .map_err(|_| Error::invalid_entry(path, "file too large for this platform"))?;
        file.seek(SeekFrom::Start(start))?;
        let mut data = vec![0u8; len];
        read_exact_or_decode(&mut file, &mut data, "archive truncated")?;
        Ok(data)
    }

    /// Every absolute in-archive path in pre-order.
    pub fn list_paths(&self) -> ListPaths<'_> {
        self.root.list_paths()
    }

    /// Every `(absolute path, node)` pair in pre-order.
    pub fn list_entries(&self) -> Entries<'_> {
        self.root.entries()
    }

    /// Re-serialize the header as pretty JSON.
    pub fn header_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }
}
