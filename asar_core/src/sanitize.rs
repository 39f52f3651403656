//! Containment checks for filesystem paths derived from archive entries.

use crate::error::{Error, Result};
use crate::tree::split_path;
use std::path::{Component, Path, PathBuf};

/// Join an in-archive path onto `root`, refusing anything that leaves it.
///
/// The check is lexical: `..` segments are applied as they appear and must
/// never climb above `root`. Segments that are not plain names on this
/// platform (drive prefixes, for example) are rejected as well.
pub fn join_within(root: &Path, entry: &str) -> Result<PathBuf> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in split_path(entry) {
        if segment == ".." {
            if segments.pop().is_none() {
                return Err(Error::path_escape(entry, entry, root));
            }
            continue;
        }

        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => segments.push(segment),
            _ => return Err(Error::path_escape(entry, segment, root)),
        }
    }

    let mut path = root.to_path_buf();
    path.extend(segments);
    Ok(path)
}

/// Verify that the closest existing ancestor of `path` really lives under
/// `root` once symlinks are resolved.
///
/// `root` must already be canonical. This catches symlinks left in the
/// destination that would redirect writes elsewhere.
pub fn ensure_within(root: &Path, path: &Path) -> Result<()> {
    let mut ancestor = path.parent();
    while let Some(candidate) = ancestor {
        if candidate.symlink_metadata().is_ok() {
            let real = candidate.canonicalize()?;
            if !real.starts_with(root) {
                return Err(Error::path_escape(
                    path.display().to_string(),
                    real.display().to_string(),
                    root,
                ));
            }
            return Ok(());
        }
        ancestor = candidate.parent();
    }
    Ok(())
}

/// Refuse a directory key that is not exactly one plain path segment.
///
/// Keys holding a separator, `.`, `..` or nothing at all would place the
/// entry somewhere other than below its parent.
pub fn check_entry_name(root: &Path, path: &str, name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && matches!(
            Path::new(name).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );
    if plain {
        Ok(())
    } else {
        Err(Error::path_escape(path, name, root))
    }
}

/// Apply `relative` to the canonical directory `base` without touching the
/// filesystem, the way the OS reads a relative symlink stored in `base`.
pub fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    let mut path = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::ParentDir => {
                path.pop();
            }
            Component::CurDir => {}
            other => path.push(other),
        }
    }
    path
}

/// Relative path from directory `from` to `to`, both given as segments below
/// the same root.
pub fn relative_segments(from: &[String], to: &[String]) -> PathBuf {
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut path = PathBuf::new();
    for _ in common..from.len() {
        path.push("..");
    }
    for segment in &to[common..] {
        path.push(segment);
    }
    if path.as_os_str().is_empty() {
        path.push(".");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn segments(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_join_within_plain() {
        let root = Path::new("/dest");
        assert_eq!(
            join_within(root, "/a/b.txt").unwrap(),
            PathBuf::from("/dest/a/b.txt")
        );
        assert_eq!(
            join_within(root, "a\\.\\b.txt").unwrap(),
            PathBuf::from("/dest/a/b.txt")
        );
        assert_eq!(join_within(root, "/").unwrap(), PathBuf::from("/dest"));
    }

    #[test]
    fn test_join_within_inner_parent_dir() {
        let root = Path::new("/dest");
        assert_eq!(
            join_within(root, "a/../b.txt").unwrap(),
            PathBuf::from("/dest/b.txt")
        );
    }

    #[test]
    fn test_join_within_rejects_escape() {
        let root = Path::new("/dest");
        let err = join_within(root, "../evil").unwrap_err();
        assert!(err.is_path_escape());
        assert!(join_within(root, "/a/../../evil").is_err());
        assert!(join_within(root, "..").is_err());
    }

    #[test]
    #[cfg(windows)]
    fn test_join_within_rejects_drive_prefix() {
        assert!(join_within(Path::new("C:\\dest"), "D:/evil").is_err());
    }

    #[test]
    fn test_ensure_within_existing_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        ensure_within(&root, &root.join("sub/file.txt")).unwrap();
        // Missing intermediate directories fall back to the nearest ancestor
        ensure_within(&root, &root.join("sub/x/y/z.txt")).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_ensure_within_rejects_symlinked_parent() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("sneaky")).unwrap();

        let err = ensure_within(&root, &root.join("sneaky/file.txt")).unwrap_err();
        assert!(err.is_path_escape());
    }

    #[test]
    fn test_check_entry_name() {
        let root = Path::new("/dest");
        check_entry_name(root, "/a/b.txt", "b.txt").unwrap();
        check_entry_name(root, "/a/..b", "..b").unwrap();

        for name in ["", ".", "..", "l/up", "l\\up", "/abs"] {
            let err = check_entry_name(root, "/x", name).unwrap_err();
            assert!(err.is_path_escape(), "{:?} accepted", name);
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_join_relative() {
        let base = Path::new("/dest/a/b");
        assert_eq!(
            join_relative(base, Path::new("../c/./d")),
            PathBuf::from("/dest/a/c/d")
        );
        assert_eq!(
            join_relative(base, Path::new("../../..")),
            PathBuf::from("/")
        );
        assert!(!join_relative(Path::new("/dest"), Path::new("../t")).starts_with("/dest"));
    }

    #[test]
    fn test_relative_segments() {
        assert_eq!(
            relative_segments(&segments(&["a", "b"]), &segments(&["a", "c", "d"])),
            PathBuf::from("../c/d")
        );
        assert_eq!(
            relative_segments(&segments(&[]), &segments(&["x"])),
            PathBuf::from("x")
        );
        assert_eq!(
            relative_segments(&segments(&["a"]), &segments(&["a"])),
            PathBuf::from(".")
        );
        assert_eq!(
            relative_segments(&segments(&["a", "b"]), &segments(&[])),
            PathBuf::from("../..")
        );
    }
}
