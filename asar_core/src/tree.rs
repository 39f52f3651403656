//! Path resolution and enumeration over the header tree.

use crate::error::{Error, Result};
use crate::node::{DirectoryNode, Node};

/// Symlink hops followed before a lookup gives up.
const MAX_LINK_HOPS: usize = 40;

/// Split an in-archive path into segments.
///
/// Both `/` and `\` separate segments; empty and `.` segments are dropped.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
}

impl DirectoryNode {
    /// Resolve `path` to a directory, creating missing directories on the way.
    ///
    /// Fails only when an existing segment is not a directory.
    pub fn open_directory(&mut self, path: &str) -> Result<&mut DirectoryNode> {
        self.open_segments(split_path(path), path)
    }

    fn open_segments<'p>(
        &mut self,
        segments: impl IntoIterator<Item = &'p str>,
        path: &str,
    ) -> Result<&mut DirectoryNode> {
        let mut dir = self;
        for segment in segments {
            let node = dir
                .files
                .entry(segment.to_string())
                .or_insert_with(Node::directory);
            dir = match node {
                Node::Directory(child) => child,
                other => {
                    return Err(Error::invalid_entry(
                        path,
                        format!(
                            "unexpected {} at \"{}\" while traversing",
                            other.kind_str(),
                            segment
                        ),
                    ));
                }
            };
        }
        Ok(dir)
    }

    /// Return the node at `path`, inserting the result of `make` if absent.
    ///
    /// Parent directories are created as needed. An empty path is an error
    /// because the root itself cannot be replaced.
    pub fn open_entry(&mut self, path: &str, make: impl FnOnce() -> Node) -> Result<&mut Node> {
        let (parent, name) = split_parent(path)
            .ok_or_else(|| Error::invalid_entry(path, "path has no file name"))?;
        let dir = self.open_segments(parent, path)?;
        Ok(dir.files.entry(name.to_string()).or_insert_with(make))
    }

    /// Iterate over every absolute in-archive path in pre-order.
    ///
    /// Parents come before their children and siblings keep insertion order.
    /// Each call starts a fresh walk.
    pub fn list_paths(&self) -> ListPaths<'_> {
        ListPaths {
            inner: self.entries(),
        }
    }

    /// Like [`list_paths`](Self::list_paths), paired with each node.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            stack: vec![(String::new(), self.files.iter())],
        }
    }
}

impl Node {
    /// Pre-order paths below this node; empty unless it is a directory.
    pub fn list_paths(&self) -> ListPaths<'_> {
        ListPaths {
            inner: self.entries(),
        }
    }

    /// Pre-order `(path, node)` pairs below this node.
    pub fn entries(&self) -> Entries<'_> {
        match self {
            Node::Directory(dir) => dir.entries(),
            _ => Entries { stack: Vec::new() },
        }
    }

    /// Resolve `path` from this (root) node for reading.
    ///
    /// Returns `None` when any segment is missing. With `follow_links`, every
    /// symlink met along the way, including the last segment, is replaced by
    /// its target resolved against the link's containing directory.
    pub fn get_node(&self, path: &str, follow_links: bool) -> Option<&Node> {
        self.resolve(path, follow_links).map(|(_, node)| node)
    }

    /// Like [`get_node`](Self::get_node), also returning the segments of the
    /// path that was finally reached.
    pub fn resolve(&self, path: &str, follow_links: bool) -> Option<(Vec<String>, &Node)> {
        let mut pending: Vec<String> = split_path(path).map(str::to_string).collect();
        pending.reverse();
        let mut current: Vec<String> = Vec::new();
        let mut node = self;
        let mut hops = 0;

        while let Some(segment) = pending.pop() {
            let child = node.as_directory()?.files.get(&segment)?;

            match child {
                Node::Link(link) if follow_links => {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return None;
                    }

                    // Resolve relative to the containing directory, then restart at the root.
                    let target = normalize_segments(&current, &link.link)?;
                    for segment in target.into_iter().rev() {
                        pending.push(segment);
                    }
                    current.clear();
                    node = self;
                }
                _ => {
                    current.push(segment);
                    node = child;
                }
            }
        }

        Some((current, node))
    }
}

impl DirectoryNode {
    /// Mutable lookup without link following or auto-creation.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Node> {
        let (parent, name) = split_parent(path)?;
        let mut dir = self;
        for segment in parent {
            dir = dir.files.get_mut(segment)?.as_directory_mut()?;
        }
        dir.files.get_mut(name)
    }
}

/// Split `path` into its parent segments and final segment.
pub fn split_parent(path: &str) -> Option<(Vec<&str>, &str)> {
    let mut segments: Vec<&str> = split_path(path).collect();
    let name = segments.pop()?;
    Some((segments, name))
}

/// Join `target` onto `base` lexically, applying `..`.
///
/// Returns `None` if the result would climb above the root.
pub fn normalize_segments(base: &[String], target: &str) -> Option<Vec<String>> {
    let mut out: Vec<String> = if target.starts_with(['/', '\\']) {
        Vec::new()
    } else {
        base.to_vec()
    };

    for segment in split_path(target) {
        if segment == ".." {
            out.pop()?;
        } else {
            out.push(segment.to_string());
        }
    }
    Some(out)
}

/// Pre-order walk yielding `(absolute path, node)`.
#[derive(Debug)]
pub struct Entries<'a> {
    stack: Vec<(String, indexmap::map::Iter<'a, String, Node>)>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (String, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, iter) = self.stack.last_mut()?;
            match iter.next() {
                Some((name, node)) => {
                    let path = format!("{}/{}", prefix, name);
                    if let Node::Directory(dir) = node {
                        self.stack.push((path.clone(), dir.files.iter()));
                    }
                    return Some((path, node));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Pre-order walk yielding absolute paths only.
#[derive(Debug)]
pub struct ListPaths<'a> {
    inner: Entries<'a>,
}

impl Iterator for ListPaths<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next().map(|(path, _)| path)
    }
}
