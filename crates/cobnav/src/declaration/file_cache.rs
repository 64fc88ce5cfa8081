//
// declaration/file_cache.rs
//
// Read-through source cache for one resolution session
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::content_provider::{FileAccessor, SourceEncoding};
use super::path_resolve::normalize_path;
use super::types::SourceBuffer;

/// Source buffers loaded while resolving a query.
///
/// Entries are never replaced once loaded; a path's content is treated as
/// immutable for as long as the cache is held. Live editor buffers are seeded
/// with [`FileCache::insert`] so they take precedence over disk.
#[derive(Debug, Default)]
pub struct FileCache {
    inner: RwLock<HashMap<PathBuf, Arc<SourceBuffer>>>,
}

fn cache_key(path: &Path) -> PathBuf {
    normalize_path(path).unwrap_or_else(|| path.to_path_buf())
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get cached content without touching the accessor
    pub fn get(&self, path: &Path) -> Option<Arc<SourceBuffer>> {
        self.inner.read().ok()?.get(&cache_key(path)).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Seed the cache with an in-memory buffer (e.g. an open editor document)
    pub fn insert(&self, path: &Path, buffer: SourceBuffer) -> Arc<SourceBuffer> {
        let buffer = Arc::new(buffer);
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(cache_key(path), buffer.clone());
        }
        buffer
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalidate all cache entries
    pub fn invalidate_all(&self) {
        if let Ok(mut guard) = self.inner.write() {
            guard.clear();
        }
    }

    /// Return cached content or read it through `accessor` and cache it
    pub async fn get_or_load(
        &self,
        path: &Path,
        accessor: &dyn FileAccessor,
        encoding: SourceEncoding,
    ) -> std::io::Result<Arc<SourceBuffer>> {
        if let Some(buffer) = self.get(path) {
            log::trace!("File cache hit for '{}'", path.display());
            return Ok(buffer);
        }

        log::trace!("File cache miss for '{}', reading", path.display());
        let text = accessor.read(path, encoding).await?;
        let buffer = Arc::new(SourceBuffer::from_text(&text));

        // A concurrent load of the same path may have won; keep the first entry
        let mut guard = self
            .inner
            .write()
            .map_err(|_| std::io::Error::other("file cache lock poisoned"))?;
        Ok(guard
            .entry(cache_key(path))
            .or_insert(buffer)
            .clone())
    }
}
