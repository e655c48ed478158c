use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

type PendingRead = Shared<BoxFuture<'static, Result<Arc<str>>>>;

/// Process-wide memo of template text, keyed by absolute path
static FILE_CACHE: Lazy<Arc<DashMap<PathBuf, PendingRead>>> =
    Lazy::new(|| Arc::new(DashMap::new()));

/// Source of raw template text
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Arc<str>>;
}

/// Reads templates from disk
///
/// With caching on, the first read of a path stores its pending future and
/// every later or concurrent read of the same path awaits that same entry,
/// so a template included many times is read from disk once. Failed reads
/// are evicted so the next attempt goes back to disk.
#[derive(Clone)]
pub struct FileLoader {
    cache: Option<Arc<DashMap<PathBuf, PendingRead>>>,
}

impl FileLoader {
    /// Loader backed by the process-wide memo
    pub fn shared() -> Self {
        Self {
            cache: Some(Arc::clone(&FILE_CACHE)),
        }
    }

    /// Loader with a memo of its own
    pub fn isolated() -> Self {
        Self {
            cache: Some(Arc::new(DashMap::new())),
        }
    }

    /// Loader that always goes to disk
    pub fn uncached() -> Self {
        Self { cache: None }
    }

    /// Number of memoised paths
    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.len())
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    fn absolute(path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(std::env::current_dir()?.join(path))
        }
    }
}

async fn read_file(path: PathBuf) -> Result<Arc<str>> {
    let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::from(e).with_context(format!("Failed to read template '{}'", path.display()))
    })?;
    log::debug!("Read template '{}' ({} bytes)", path.display(), text.len());
    Ok(Arc::from(text))
}

/// Drop a failed read, unless the entry has been replaced in the meantime
fn evict(cache: &DashMap<PathBuf, PendingRead>, key: &Path, failed: &PendingRead) {
    if cache.remove_if(key, |_, entry| entry.ptr_eq(failed)).is_some() {
        log::debug!("Evicted failed read of '{}'", key.display());
    }
}

#[async_trait]
impl TemplateLoader for FileLoader {
    async fn read(&self, path: &Path) -> Result<Arc<str>> {
        let key = Self::absolute(path)?;

        let Some(cache) = &self.cache else {
            return read_file(key).await;
        };

        let pending = cache
            .entry(key.clone())
            .or_insert_with(|| read_file(key.clone()).boxed().shared())
            .value()
            .clone();

        let result = pending.clone().await;
        if result.is_err() {
            evict(cache, &key, &pending);
        }
        result
    }
}

/// Serves templates from memory, for embedded templates and tests
#[derive(Default)]
pub struct MemoryLoader {
    templates: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, text: impl Into<String>) -> &Self {
        if let Ok(mut templates) = self.templates.write() {
            templates.insert(path.into(), Arc::from(text.into()));
        }
        self
    }
}

#[async_trait]
impl TemplateLoader for MemoryLoader {
    async fn read(&self, path: &Path) -> Result<Arc<str>> {
        let templates = self
            .templates
            .read()
            .map_err(|_| Error::internal("Template store lock poisoned"))?;

        templates.get(path).cloned().ok_or_else(|| {
            Error::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Template '{}' not found", path.display()),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_through_memo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "first").unwrap();

        let loader = FileLoader::isolated();
        assert_eq!(&*loader.read(&path).await.unwrap(), "first");

        // the memo keeps serving the first read
        std::fs::write(&path, "second").unwrap();
        assert_eq!(&*loader.read(&path).await.unwrap(), "first");
        assert_eq!(loader.cached_len(), 1);

        let uncached = FileLoader::uncached();
        assert_eq!(&*uncached.read(&path).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.html");
        std::fs::write(&path, "shared").unwrap();

        let loader = FileLoader::isolated();
        let (a, b) = tokio::join!(loader.read(&path), loader.read(&path));
        assert_eq!(&*a.unwrap(), "shared");
        assert_eq!(&*b.unwrap(), "shared");
        assert_eq!(loader.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_failed_read_is_evicted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.html");

        let loader = FileLoader::isolated();
        let err = loader.read(&path).await.unwrap_err();
        assert_eq!(err.error_code(), "E_IO");
        assert_eq!(loader.cached_len(), 0);

        std::fs::write(&path, "now here").unwrap();
        assert_eq!(&*loader.read(&path).await.unwrap(), "now here");
    }

    #[test]
    fn test_eviction_keeps_newer_entry() {
        let cache: DashMap<PathBuf, PendingRead> = DashMap::new();
        let key = PathBuf::from("/templates/page.html");
        let failed: PendingRead = async { Err::<Arc<str>, _>(Error::internal("gone")) }.boxed().shared();
        let fresh: PendingRead = async { Ok::<_, Error>(Arc::<str>::from("fresh")) }.boxed().shared();

        cache.insert(key.clone(), fresh.clone());
        evict(&cache, &key, &failed);
        assert!(cache.get(&key).is_some());

        evict(&cache, &key, &fresh);
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemoryLoader::new();
        loader.insert("a.html", "A");
        assert_eq!(&*loader.read(Path::new("a.html")).await.unwrap(), "A");
        assert!(loader.read(Path::new("b.html")).await.is_err());
    }
}
