//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use replay_storage::{
    BoxFuture, MemoryObjectStore, ObjectStore, SessionStorage, StorageConfig, StorageError,
    StorageMetrics, StorageResult, WorkerHandle,
};
use tokio::sync::{mpsc, Semaphore};

/// Split threshold used by the fixtures; small so tests stay fast.
pub const SPLIT: usize = 64;

/// Config rooted at `dir` with a small split threshold.
pub fn test_config(dir: &Path) -> StorageConfig {
    StorageConfig {
        fs_dir: dir.to_path_buf(),
        file_split_size: SPLIT,
        max_file_size: 4096,
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

/// Write the DOM capture of a session.
pub fn write_dom(dir: &Path, session_id: u64, data: &[u8]) {
    std::fs::write(dir.join(session_id.to_string()), data).unwrap();
}

/// Write the devtools capture of a session.
pub fn write_devtools(dir: &Path, session_id: u64, data: &[u8]) {
    std::fs::write(dir.join(format!("{}devtools", session_id)), data).unwrap();
}

/// Deterministic non-repeating payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Start a pipeline over `store`.
pub fn start(
    config: StorageConfig,
    store: Arc<dyn ObjectStore>,
) -> (SessionStorage, WorkerHandle, Arc<StorageMetrics>) {
    let metrics = Arc::new(StorageMetrics::new());
    let (storage, handle) = SessionStorage::start(config, store, Arc::clone(&metrics)).unwrap();
    (storage, handle, metrics)
}

/// Store whose puts wait for a permit, reporting each key as it starts.
pub struct GatedStore {
    pub inner: MemoryObjectStore,
    gate: Semaphore,
    started: mpsc::UnboundedSender<String>,
}

impl GatedStore {
    /// Closed gate plus the receiver of started put keys.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            inner: MemoryObjectStore::new(),
            gate: Semaphore::new(0),
            started: tx,
        });
        (store, rx)
    }

    /// Let `n` more puts through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

impl ObjectStore for GatedStore {
    fn put(
        &self,
        key: String,
        data: Bytes,
        content_type: String,
        compressed: bool,
    ) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let _ = self.started.send(key.clone());
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.inner.put(key, data, content_type, compressed).await
        })
    }
}

/// Store that fails its first `failures` puts, then behaves.
pub struct FlakyStore {
    pub inner: MemoryObjectStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryObjectStore::new(),
            failures_left: AtomicU32::new(failures),
        })
    }
}

impl ObjectStore for FlakyStore {
    fn put(
        &self,
        key: String,
        data: Bytes,
        content_type: String,
        compressed: bool,
    ) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(StorageError::Io(std::io::Error::other("transient store error")));
            }
            self.inner.put(key, data, content_type, compressed).await
        })
    }
}
