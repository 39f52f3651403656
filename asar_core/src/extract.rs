//! Bulk extraction of an archive into a directory.
//!
//! Every entry is attempted. Entries whose destination or symlink target
//! would land outside the destination root are refused, and failures are
//! collected into one [`ExtractionError`] reported after the last entry.

use crate::archive::Archive;
use crate::error::{Error, ExtractionError, Result};
use crate::node::{FileNode, LinkNode, Node};
use crate::sanitize::{
    check_entry_name, ensure_within, join_relative, join_within, relative_segments,
};
use crate::tree::{normalize_segments, split_parent};
use crate::walk::{CrawlOptions, EntryKind, crawl};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Counts of extracted entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub directories: usize,
    pub files: usize,
    /// Symlinks, whether recreated as links or copied.
    pub links: usize,
}

/// Extract every entry of `archive` below `dest`.
///
/// Entries that extracted successfully stay on disk even when others fail.
pub fn extract_all(
    archive: &Archive,
    dest: impl AsRef<Path>,
) -> std::result::Result<ExtractReport, ExtractionError> {
    let mut report = ExtractReport::default();
    let mut failures = ExtractionError::default();

    let dest = match prepare_dest(dest.as_ref()) {
        Ok(dest) => dest,
        Err(e) => {
            failures.push("/", e);
            return Err(failures);
        }
    };

    // Pre-order walk that keeps each entry's own key, so a key that is not a
    // single segment fails on its own and its subtree is skipped
    let mut stack = match archive.root() {
        Node::Directory(root) => vec![(String::new(), root.files.iter())],
        _ => Vec::new(),
    };
    while let Some((prefix, children)) = stack.last_mut() {
        let Some((name, node)) = children.next() else {
            stack.pop();
            continue;
        };
        let path = format!("{}/{}", prefix, name);

        let result = check_entry_name(&dest, &path, name).and_then(|()| match node {
            Node::Directory(_) => {
                extract_directory(&dest, &path).map(|()| report.directories += 1)
            }
            Node::File(file) => {
                extract_file(archive, &dest, &path, file).map(|()| report.files += 1)
            }
            Node::Link(link) => extract_link(&dest, &path, link).map(|()| report.links += 1),
        });

        match (result, node) {
            (Ok(()), Node::Directory(dir)) => stack.push((path, dir.files.iter())),
            (Ok(()), _) => {}
            (Err(e), _) => {
                tracing::warn!(entry = %path, error = %e, "failed to extract entry");
                failures.push(path, e);
            }
        }
    }

    if failures.is_empty() {
        tracing::info!(
            archive = %archive.path().display(),
            dest = %dest.display(),
            directories = report.directories,
            files = report.files,
            links = report.links,
            "archive extracted"
        );
        Ok(report)
    } else {
        Err(failures)
    }
}

fn prepare_dest(dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;
    Ok(dest.canonicalize()?)
}

/// Destination of entry `path`, checked lexically and against symlinks
/// already present under `dest`.
fn target_path(dest: &Path, path: &str) -> Result<PathBuf> {
    let target = join_within(dest, path)?;
    ensure_within(dest, &target)?;
    Ok(target)
}

fn extract_directory(dest: &Path, path: &str) -> Result<()> {
    let target = target_path(dest, path)?;
    fs::create_dir_all(&target)?;
    Ok(())
}

fn extract_file(archive: &Archive, dest: &Path, path: &str, file: &FileNode) -> Result<()> {
    let target = target_path(dest, path)?;
    let data = archive.read_entry(path, file)?;

    let parent = target
        .parent()
        .ok_or_else(|| Error::invalid_entry(path, "entry has no parent directory"))?;
    fs::create_dir_all(parent)?;

    // Only a complete write is renamed into place
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(&data)?;
    temp.persist(&target)?;

    set_file_mode(&target, if file.executable { 0o755 } else { 0o644 })?;
    Ok(())
}

fn extract_link(dest: &Path, path: &str, link: &LinkNode) -> Result<()> {
    let target = target_path(dest, path)?;
    let (parent, _) =
        split_parent(path).ok_or_else(|| Error::invalid_entry(path, "entry has no name"))?;
    let parent: Vec<String> = parent.into_iter().map(str::to_string).collect();

    let resolved = normalize_segments(&parent, &link.link)
        .ok_or_else(|| Error::path_escape(path, &link.link, dest))?;
    let pointee = join_within(dest, &resolved.join("/"))?;
    if let Ok(real) = pointee.canonicalize() {
        if !real.starts_with(dest) {
            return Err(Error::path_escape(path, real.display().to_string(), dest));
        }
    }

    let dir = target
        .parent()
        .ok_or_else(|| Error::invalid_entry(path, "entry has no parent directory"))?;
    fs::create_dir_all(dir)?;

    // The link text is read from where the link physically lands
    let relative = relative_segments(&parent, &resolved);
    let landing = join_relative(&dir.canonicalize()?, &relative);
    let escapes = !landing.starts_with(dest)
        || landing
            .canonicalize()
            .is_ok_and(|real| !real.starts_with(dest));
    if escapes {
        return Err(Error::path_escape(
            path,
            landing.display().to_string(),
            dest,
        ));
    }

    if let Ok(existing) = target.symlink_metadata() {
        if !existing.is_dir() {
            fs::remove_file(&target)?;
        }
    }

    if let Err(e) = create_symlink(&relative, &target, &landing) {
        tracing::warn!(
            entry = %path,
            error = %e,
            "symlink creation failed, copying target instead"
        );
        copy_target(&landing, &target)?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(relative: &Path, link: &Path, _pointee: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(relative, link)
}

#[cfg(windows)]
fn create_symlink(relative: &Path, link: &Path, pointee: &Path) -> io::Result<()> {
    if pointee.is_dir() {
        std::os::windows::fs::symlink_dir(relative, link)
    } else {
        std::os::windows::fs::symlink_file(relative, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_relative: &Path, _link: &Path, _pointee: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// Copy a link's pointee to `target` in place of the link.
fn copy_target(pointee: &Path, target: &Path) -> Result<()> {
    if !pointee.is_dir() {
        fs::copy(pointee, target)?;
        return Ok(());
    }

    fs::create_dir_all(target)?;
    for entry in crawl(pointee, &CrawlOptions::default())? {
        let Ok(rel) = entry.path.strip_prefix(pointee) else {
            continue;
        };
        let copy = target.join(rel);
        match entry.kind {
            Some(EntryKind::Directory) => fs::create_dir_all(&copy)?,
            Some(EntryKind::File) => {
                fs::copy(&entry.path, &copy)?;
            }
            _ => tracing::debug!(path = %entry.path.display(), "skipped while copying link target"),
        }
    }
    Ok(())
}

/// Set file mode (permissions) on a path.
#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Set file mode (Windows no-op).
#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::write_header;
    use crate::builder::{CreateOptions, create_archive};
    use crate::integrity::{FileIntegrity, IntegrityConfig};
    use crate::node::{DirectoryNode, FileLocation};
    use tempfile::TempDir;

    /// Relative path and contents (`None` for directories) of every entry below `root`.
    fn snapshot(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
        crawl(root, &CrawlOptions::default())
            .unwrap()
            .into_iter()
            .map(|entry| {
                let rel = entry.path.strip_prefix(root).unwrap();
                let rel = rel.to_string_lossy().replace('\\', "/");
                let contents = match entry.kind {
                    Some(EntryKind::File) => Some(fs::read(&entry.path).unwrap()),
                    _ => None,
                };
                (rel, contents)
            })
            .collect()
    }

    fn packed(data: &[u8], offset: u64) -> Node {
        Node::File(FileNode {
            size: data.len() as u64,
            location: FileLocation::Packed { offset },
            executable: false,
            integrity: FileIntegrity::from_bytes(data, &IntegrityConfig::default()),
        })
    }

    fn link(target: &str) -> Node {
        Node::Link(LinkNode {
            link: target.to_string(),
        })
    }

    /// Write a container by hand, bypassing the builder's checks.
    fn write_container(path: &Path, root: &DirectoryNode, blob: &[u8]) -> Archive {
        let mut out = Vec::new();
        write_header(&mut out, root).unwrap();
        out.extend_from_slice(blob);
        fs::write(path, out).unwrap();
        Archive::open(path).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("lib/nested/deeper")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::create_dir_all(src.join("native")).unwrap();
        fs::write(src.join("index.js"), b"console.log('hi');\n").unwrap();
        fs::write(src.join("lib/blank"), b"").unwrap();
        fs::write(src.join("lib/nested/deeper/data.bin"), [0u8, 1, 2, 255, 254]).unwrap();
        fs::write(src.join("native/addon.node"), vec![7u8; 4096]).unwrap();
        fs::write(src.join("unicode-\u{00e9}.txt"), "caf\u{00e9}").unwrap();

        let archive_path = temp_dir.path().join("app.asar");
        let options = CreateOptions::default().with_unpack(|dir| dir == "native");
        create_archive(&src, &archive_path, options).unwrap();

        let archive = Archive::open(&archive_path).unwrap();
        let dest = temp_dir.path().join("out");
        let report = extract_all(&archive, &dest).unwrap();

        assert_eq!(report.files, 5);
        assert_eq!(report.directories, 5);
        assert_eq!(report.links, 0);
        assert_eq!(snapshot(&dest), snapshot(&src));
    }

    #[test]
    fn test_traversal_guard_fails_only_bad_entries() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("evil.asar");

        let mut root = DirectoryNode::default();
        root.files.insert("../evil".to_string(), packed(b"evil", 0));
        root.files.insert("good.txt".to_string(), packed(b"good", 4));
        root.files.insert("escape".to_string(), link("../../outside"));
        let archive = write_container(&archive_path, &root, b"evilgood");

        let dest = temp_dir.path().join("dest");
        let err = extract_all(&archive, &dest).unwrap_err();

        assert_eq!(err.len(), 2);
        let paths: Vec<&str> = err.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/../evil", "/escape"]);
        assert!(err.iter().all(|f| f.error.is_path_escape()));

        assert_eq!(fs::read(dest.join("good.txt")).unwrap(), b"good");
        assert!(!temp_dir.path().join("evil").exists());
        assert!(dest.join("escape").symlink_metadata().is_err());
        assert!(err.to_string().starts_with("Unable to extract 2 entries:"));
    }

    #[test]
    fn test_nested_parent_dir_escape() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("evil.asar");

        let mut sub = DirectoryNode::default();
        sub.files.insert("up".to_string(), link("../../../etc"));
        let mut root = DirectoryNode::default();
        root.files.insert("sub".to_string(), Node::Directory(sub));
        let archive = write_container(&archive_path, &root, b"");

        let err = extract_all(&archive, temp_dir.path().join("dest")).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.failures[0].path, "/sub/up");
        assert!(err.failures[0].error.is_path_escape());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_rebased() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("links.asar");

        let mut sub = DirectoryNode::default();
        sub.files.insert("real.txt".to_string(), packed(b"real", 0));
        sub.files.insert("up".to_string(), link("../top.txt"));
        let mut root = DirectoryNode::default();
        root.files.insert("top.txt".to_string(), packed(b"top", 4));
        root.files.insert("sub".to_string(), Node::Directory(sub));
        root.files.insert("alias".to_string(), link("sub/real.txt"));
        root.files.insert("rooted".to_string(), link("/sub/real.txt"));
        let archive = write_container(&archive_path, &root, b"realtop");

        let dest = temp_dir.path().join("dest");
        let report = extract_all(&archive, &dest).unwrap();
        assert_eq!(report.links, 3);

        assert_eq!(
            fs::read_link(dest.join("alias")).unwrap(),
            PathBuf::from("sub/real.txt")
        );
        assert_eq!(
            fs::read_link(dest.join("sub/up")).unwrap(),
            PathBuf::from("../top.txt")
        );
        // Leading slash means the archive root, not the filesystem root
        assert_eq!(
            fs::read_link(dest.join("rooted")).unwrap(),
            PathBuf::from("sub/real.txt")
        );
        assert_eq!(fs::read(dest.join("alias")).unwrap(), b"real");
        assert_eq!(fs::read(dest.join("sub/up")).unwrap(), b"top");
    }

    #[test]
    #[cfg(unix)]
    fn test_key_with_separator_cannot_ride_an_earlier_link() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("evil.asar");

        // `l` points back at the root; `l/up` is a sibling key, not a child of `l`
        let mut b = DirectoryNode::default();
        b.files.insert("l".to_string(), link("../.."));
        b.files.insert("l/up".to_string(), link("../.."));
        let mut a = DirectoryNode::default();
        a.files.insert("b".to_string(), Node::Directory(b));
        let mut root = DirectoryNode::default();
        root.files.insert("a".to_string(), Node::Directory(a));
        let archive = write_container(&archive_path, &root, b"");

        let dest = temp_dir.path().join("x/dest");
        let err = extract_all(&archive, &dest).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.failures[0].path, "/a/b/l/up");
        assert!(err.failures[0].error.is_path_escape());

        assert_eq!(
            fs::read_link(dest.join("a/b/l")).unwrap(),
            PathBuf::from("../..")
        );
        assert!(dest.join("up").symlink_metadata().is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_link_text_checked_where_it_lands() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("x/dest");
        fs::create_dir_all(&dest).unwrap();
        // `a` already exists and folds back onto the destination itself
        std::os::unix::fs::symlink(".", dest.join("a")).unwrap();

        let mut a = DirectoryNode::default();
        a.files.insert("up".to_string(), link("../t"));
        let mut root = DirectoryNode::default();
        root.files.insert("t".to_string(), packed(b"t", 0));
        root.files.insert("a".to_string(), Node::Directory(a));
        let archive = write_container(&temp_dir.path().join("a.asar"), &root, b"t");

        let err = extract_all(&archive, &dest).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.failures[0].path, "/a/up");
        assert!(err.failures[0].error.is_path_escape());
        assert!(dest.join("up").symlink_metadata().is_err());
        assert_eq!(fs::read(dest.join("t")).unwrap(), b"t");
    }

    #[test]
    #[cfg(unix)]
    fn test_existing_symlink_in_dest_is_not_followed() {
        let temp_dir = TempDir::new().unwrap();
        let outside = temp_dir.path().join("outside");
        let dest = temp_dir.path().join("dest");
        fs::create_dir_all(&outside).unwrap();
        fs::create_dir_all(&dest).unwrap();
        std::os::unix::fs::symlink(&outside, dest.join("sub")).unwrap();

        let mut sub = DirectoryNode::default();
        sub.files.insert("x.txt".to_string(), packed(b"x", 0));
        let mut root = DirectoryNode::default();
        root.files.insert("sub".to_string(), Node::Directory(sub));
        let archive = write_container(&temp_dir.path().join("a.asar"), &root, b"x");

        let err = extract_all(&archive, &dest).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.failures[0].path, "/sub/x.txt");
        assert!(err.failures[0].error.is_path_escape());
        assert!(!outside.join("x.txt").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_executable_bit_restored() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("run.sh"), b"#!/bin/sh\n").unwrap();
        fs::write(src.join("data.txt"), b"data").unwrap();
        fs::set_permissions(src.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();

        let archive_path = temp_dir.path().join("app.asar");
        create_archive(&src, &archive_path, CreateOptions::default()).unwrap();
        let archive = Archive::open(&archive_path).unwrap();

        let dest = temp_dir.path().join("out");
        extract_all(&archive, &dest).unwrap();

        let run = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        let data = fs::metadata(dest.join("data.txt")).unwrap().permissions().mode();
        assert_eq!(run & 0o777, 0o755);
        assert_eq!(data & 0o111, 0);
    }

    #[test]
    fn test_truncated_entry_leaves_no_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("short.asar");

        let mut root = DirectoryNode::default();
        root.files.insert("ok.txt".to_string(), packed(b"ok", 0));
        root.files.insert("cut.txt".to_string(), packed(b"0123456789", 2));
        let archive = write_container(&archive_path, &root, b"ok01234");

        let dest = temp_dir.path().join("dest");
        let err = extract_all(&archive, &dest).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.failures[0].path, "/cut.txt");

        let names: Vec<String> = fs::read_dir(&dest)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["ok.txt".to_string()]);
    }

    #[test]
    fn test_missing_sidecar_file_is_collected() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("app.asar");

        let mut root = DirectoryNode::default();
        root.files.insert(
            "gone.bin".to_string(),
            Node::File(FileNode {
                size: 3,
                location: FileLocation::Unpacked,
                executable: false,
                integrity: FileIntegrity::from_bytes(b"abc", &IntegrityConfig::default()),
            }),
        );
        root.files.insert("here.txt".to_string(), packed(b"here", 0));
        let archive = write_container(&archive_path, &root, b"here");

        let dest = temp_dir.path().join("dest");
        let err = extract_all(&archive, &dest).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(matches!(err.failures[0].error, Error::Io { .. }));
        assert_eq!(fs::read(dest.join("here.txt")).unwrap(), b"here");
    }

    #[test]
    fn test_unusable_destination() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("app.asar");
        let archive = write_container(&archive_path, &DirectoryNode::default(), b"");

        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();

        let err = extract_all(&archive, &blocker).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.failures[0].path, "/");
    }

    #[test]
    fn test_copy_target_directory() {
        let temp_dir = TempDir::new().unwrap();
        let pointee = temp_dir.path().join("pointee");
        fs::create_dir_all(pointee.join("inner")).unwrap();
        fs::write(pointee.join("inner/f.txt"), b"f").unwrap();
        fs::write(pointee.join("g.txt"), b"g").unwrap();

        let copy = temp_dir.path().join("copy");
        copy_target(&pointee, &copy).unwrap();
        assert_eq!(snapshot(&copy), snapshot(&pointee));

        let single = temp_dir.path().join("single.txt");
        copy_target(&pointee.join("g.txt"), &single).unwrap();
        assert_eq!(fs::read(&single).unwrap(), b"g");
    }
}
