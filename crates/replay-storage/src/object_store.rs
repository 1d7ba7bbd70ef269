//! Object store backends for uploaded session segments.
//!
//! The worker only ever calls [`ObjectStore::put`]. Keys are deterministic per
//! session and segment, so writing the same session twice (after a crash and
//! redelivery) overwrites rather than duplicates.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for object store clients (S3, GCS, Azure Blob, local disk).
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`.
    ///
    /// `compressed` tells the client the payload is already compressed so it
    /// can set the matching transfer/content encoding.
    fn put(
        &self,
        key: String,
        data: Bytes,
        content_type: String,
        compressed: bool,
    ) -> BoxFuture<'_, StorageResult<()>>;
}

/// One put as seen by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecord {
    /// Object key.
    pub key: String,
    /// Payload as received.
    pub data: Bytes,
    /// Content type passed by the caller.
    pub content_type: String,
    /// Compressed flag passed by the caller.
    pub compressed: bool,
}

/// In-memory object store for tests and dry runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    puts: Mutex<Vec<PutRecord>>,
    fail_suffix: Mutex<Option<String>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put whose key ends with `suffix` fail.
    pub fn fail_keys_ending_with(&self, suffix: &str) {
        *lock(&self.fail_suffix) = Some(suffix.to_string());
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        *lock(&self.fail_suffix) = None;
    }

    /// All successful puts, in completion order.
    pub fn puts(&self) -> Vec<PutRecord> {
        lock(&self.puts).clone()
    }

    /// Keys of all successful puts, in completion order.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.puts).iter().map(|p| p.key.clone()).collect()
    }

    /// Latest payload stored under `key`.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        lock(&self.puts)
            .iter()
            .rev()
            .find(|p| p.key == key)
            .map(|p| p.data.clone())
    }
}

// A poisoned lock only means another test thread panicked mid-put; the
// recorded data is still usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ObjectStore for MemoryObjectStore {
    fn put(
        &self,
        key: String,
        data: Bytes,
        content_type: String,
        compressed: bool,
    ) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let injected = lock(&self.fail_suffix)
                .as_deref()
                .is_some_and(|suffix| key.ends_with(suffix));
            if injected {
                return Err(StorageError::Io(std::io::Error::other(format!(
                    "injected failure for {}",
                    key
                ))));
            }
            debug!(key = %key, bytes = data.len(), "memory put");
            lock(&self.puts).push(PutRecord {
                key,
                data,
                content_type,
                compressed,
            });
            Ok(())
        })
    }
}

/// Object store rooted at a local directory; keys map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store writing under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path an object key maps to.
    pub fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(key);
        let safe = rel
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid object key: {:?}", key),
            )));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(
        &self,
        key: String,
        data: Bytes,
        _content_type: String,
        _compressed: bool,
    ) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let path = self.object_path(&key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // Write then rename so readers never see a partial object.
            let mut tmp = path.clone().into_os_string();
            tmp.push(".part");
            let tmp = PathBuf::from(tmp);
            tokio::fs::write(&tmp, &data).await?;
            tokio::fs::rename(&tmp, &path).await?;
            debug!(key = %key, bytes = data.len(), path = %path.display(), "local put");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn put(store: &dyn ObjectStore, key: &str, data: &'static [u8]) -> StorageResult<()> {
        store
            .put(
                key.to_string(),
                Bytes::from_static(data),
                "application/octet-stream".to_string(),
                true,
            )
            .await
    }

    #[tokio::test]
    async fn test_memory_store_records_puts() {
        let store = MemoryObjectStore::new();
        put(&store, "1/dom.mobs", b"abc").await.unwrap();
        put(&store, "1/devtools.mob", b"de").await.unwrap();

        assert_eq!(store.keys(), vec!["1/dom.mobs", "1/devtools.mob"]);
        let first = &store.puts()[0];
        assert!(first.compressed);
        assert_eq!(first.content_type, "application/octet-stream");
        assert_eq!(store.get("1/devtools.mob").unwrap(), Bytes::from_static(b"de"));
    }

    #[tokio::test]
    async fn test_memory_store_overwrite() {
        let store = MemoryObjectStore::new();
        put(&store, "1/dom.mobs", b"old").await.unwrap();
        put(&store, "1/dom.mobs", b"new").await.unwrap();
        assert_eq!(store.get("1/dom.mobs").unwrap(), Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_memory_store_injected_failure() {
        let store = MemoryObjectStore::new();
        store.fail_keys_ending_with("dom.mobe");

        assert!(put(&store, "3/dom.mobe", b"x").await.is_err());
        put(&store, "3/dom.mobs", b"y").await.unwrap();
        assert_eq!(store.keys(), vec!["3/dom.mobs"]);

        store.clear_failures();
        put(&store, "3/dom.mobe", b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        put(&store, "42/dom.mobs", b"payload").await.unwrap();

        let written = std::fs::read(dir.path().join("42").join("dom.mobs")).unwrap();
        assert_eq!(written, b"payload");
        assert!(!dir.path().join("42").join("dom.mobs.part").exists());
    }

    #[test]
    fn test_local_store_rejects_escaping_keys() {
        let store = LocalObjectStore::new("/srv/objects");
        assert!(store.object_path("../etc/passwd").is_err());
        assert!(store.object_path("/abs/key").is_err());
        assert!(store.object_path("").is_err());
        assert_eq!(
            store.object_path("7/devtools.mob").unwrap(),
            PathBuf::from("/srv/objects/7/devtools.mob")
        );
    }
}
