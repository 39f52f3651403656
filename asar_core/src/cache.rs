//! Parsed-header cache keyed by canonical archive path.

use crate::archive::Archive;
use crate::error::{ExtractionError, Result};
use crate::extract::{ExtractReport, extract_all};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One archive path; `None` until the first successful parse.
type Slot = Arc<Mutex<Option<Arc<Archive>>>>;

/// Cache of opened archives.
///
/// Entries never expire. After rewriting an archive in place, call
/// [`invalidate`](Self::invalidate) or later loads keep returning the old
/// header.
#[derive(Debug, Default)]
pub struct ArchiveCache {
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ArchiveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the archive at `path`, parsing its header on first use.
    ///
    /// Concurrent first loads of the same path parse it once; loads of
    /// different paths do not wait on each other. Failed parses are not
    /// cached.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Arc<Archive>> {
        let key = path.as_ref().canonicalize()?;
        let slot = Arc::clone(self.slots.lock().entry(key.clone()).or_default());

        let mut cached = slot.lock();
        if let Some(archive) = cached.as_ref() {
            tracing::debug!(archive = %key.display(), "archive cache hit");
            return Ok(Arc::clone(archive));
        }

        tracing::debug!(archive = %key.display(), "archive cache miss");
        match Archive::open(&key) {
            Ok(archive) => {
                let archive = Arc::new(archive);
                *cached = Some(Arc::clone(&archive));
                Ok(archive)
            }
            Err(e) => {
                drop(cached);
                // Owned only by the map and this call: no waiter is left to fill it
                let mut slots = self.slots.lock();
                let stale = slots.get(&key).is_some_and(|existing| {
                    Arc::ptr_eq(existing, &slot)
                        && Arc::strong_count(&slot) == 2
                        && existing.try_lock().is_some_and(|archive| archive.is_none())
                });
                // Released under the map lock so the next failed waiter sees the count drop
                drop(slot);
                if stale {
                    slots.remove(&key);
                }
                Err(e)
            }
        }
    }

    /// Drop the cached header for `path`. Returns true if one was present.
    ///
    /// Works for archives that no longer exist on disk.
    pub fn invalidate(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let key = path
            .canonicalize()
            .or_else(|_| std::path::absolute(path))
            .unwrap_or_else(|_| path.to_path_buf());

        let removed = self.slots.lock().remove(&key).is_some();
        if removed {
            tracing::debug!(archive = %key.display(), "archive cache entry invalidated");
        }
        removed
    }

    /// Drop every cached header.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Number of archives cached or currently loading.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load `archive` through the cache and extract it to `dest`.
    ///
    /// A header that cannot be parsed is reported as a failure of `/`.
    pub fn extract_all(
        &self,
        archive: impl AsRef<Path>,
        dest: impl AsRef<Path>,
    ) -> std::result::Result<ExtractReport, ExtractionError> {
        match self.load(archive) {
            Ok(archive) => extract_all(&archive, dest),
            Err(e) => {
                let mut failure = ExtractionError::default();
                failure.push("/", e);
                Err(failure)
            }
        }
    }
}
