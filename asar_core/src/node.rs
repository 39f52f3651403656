//! Header tree nodes and their JSON representation.
//!
//! On the wire a node's kind is implied by which fields are present:
//!
//! ```text
//! directory  {"files": {name: node, ...}, "unpacked"?: true}
//! file       {"size": n, "offset"?: "<decimal>", "unpacked"?: true,
//!             "executable"?: true, "integrity": {...}}
//! symlink    {"link": "<relative path>"}
//! ```
//!
//! In memory each node is exactly one [`Node`] variant.

use crate::integrity::FileIntegrity;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A directory, file, or symlink in the archive tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory(DirectoryNode),
    File(FileNode),
    Link(LinkNode),
}

/// Children in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    pub files: IndexMap<String, Node>,
    /// Force-unpack: every file below this directory goes to the sidecar.
    pub unpacked: bool,
}

/// Where a file's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLocation {
    /// In the payload blob, `offset` bytes after the header.
    Packed { offset: u64 },
    /// In the `<archive>.unpacked/` sidecar directory.
    Unpacked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub size: u64,
    pub location: FileLocation,
    pub executable: bool,
    pub integrity: FileIntegrity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNode {
    /// Target, relative to the directory containing the link.
    pub link: String,
}

impl Node {
    /// A fresh, empty directory.
    pub fn directory() -> Self {
        Node::Directory(DirectoryNode::default())
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Node::Link(_))
    }

    pub fn as_directory(&self) -> Option<&DirectoryNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirectoryNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(file) => Some(file),
            _ => None,
        }
    }

    /// True for unpacked files and force-unpack directories.
    pub fn is_unpacked(&self) -> bool {
        match self {
            Node::Directory(dir) => dir.unpacked,
            Node::File(file) => file.is_unpacked(),
            Node::Link(_) => false,
        }
    }

    /// Short kind name for listings.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Node::Directory(_) => "directory",
            Node::File(_) => "file",
            Node::Link(_) => "link",
        }
    }
}

impl FileNode {
    pub fn is_unpacked(&self) -> bool {
        self.location == FileLocation::Unpacked
    }

    /// Blob offset, `None` for unpacked files.
    pub fn offset(&self) -> Option<u64> {
        match self.location {
            FileLocation::Packed { offset } => Some(offset),
            FileLocation::Unpacked => None,
        }
    }
}

impl Serialize for DirectoryNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("files", &self.files)?;
        if self.unpacked {
            map.serialize_entry("unpacked", &true)?;
        }
        map.end()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Directory(dir) => dir.serialize(serializer),
            Node::File(file) => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("size", &file.size)?;
                match file.location {
                    // Offsets are decimal strings: JSON numbers lose precision past 2^53
                    FileLocation::Packed { offset } => {
                        map.serialize_entry("offset", &offset.to_string())?
                    }
                    FileLocation::Unpacked => map.serialize_entry("unpacked", &true)?,
                }
                if file.executable {
                    map.serialize_entry("executable", &true)?;
                }
                map.serialize_entry("integrity", &file.integrity)?;
                map.end()
            }
            Node::Link(link) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("link", &link.link)?;
                map.end()
            }
        }
    }
}

/// Wire shape: every field optional.
#[derive(Deserialize)]
struct RawNode {
    files: Option<IndexMap<String, Node>>,
    size: Option<u64>,
    offset: Option<String>,
    unpacked: Option<bool>,
    executable: Option<bool>,
    integrity: Option<FileIntegrity>,
    link: Option<String>,
}

impl TryFrom<RawNode> for Node {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let unpacked = raw.unpacked.unwrap_or(false);

        match (raw.files, raw.size, raw.link) {
            (Some(files), None, None) => Ok(Node::Directory(DirectoryNode { files, unpacked })),
            (None, Some(size), None) => {
                let location = if unpacked {
                    FileLocation::Unpacked
                } else {
                    let offset = raw
                        .offset
                        .ok_or_else(|| "packed file without offset".to_string())?;
                    let offset = offset
                        .parse::<u64>()
                        .map_err(|_| format!("invalid offset {:?}", offset))?;
                    FileLocation::Packed { offset }
                };
                let integrity = raw
                    .integrity
                    .ok_or_else(|| "file without integrity record".to_string())?;
                Ok(Node::File(FileNode {
                    size,
                    location,
                    executable: raw.executable.unwrap_or(false),
                    integrity,
                }))
            }
            (None, None, Some(link)) => Ok(Node::Link(LinkNode { link })),
            (None, None, None) => Err("entry is neither directory, file nor link".to_string()),
            _ => Err("entry mixes directory, file and link fields".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawNode::deserialize(deserializer)?;
        Node::try_from(raw).map_err(serde::de::Error::custom)
    }
}
