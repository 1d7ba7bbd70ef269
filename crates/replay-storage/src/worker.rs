//! Upload worker: drains the hand-off queue one task at a time.
//!
//! Each task's segments are put concurrently and all puts are joined before
//! the next task is taken. A put that fails all its attempts stops the worker;
//! the error comes back through [`WorkerHandle`] and the owner of the process
//! is expected to exit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::metrics::StorageMetrics;
use crate::object_store::ObjectStore;
use crate::task::Task;

/// Consumer side of the hand-off queue.
pub struct UploadWorker {
    store: Arc<dyn ObjectStore>,
    rx: mpsc::Receiver<Task>,
    config: Arc<StorageConfig>,
    metrics: Arc<StorageMetrics>,
}

impl UploadWorker {
    /// Create a worker reading tasks from `rx`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        rx: mpsc::Receiver<Task>,
        config: Arc<StorageConfig>,
        metrics: Arc<StorageMetrics>,
    ) -> Self {
        Self {
            store,
            rx,
            config,
            metrics,
        }
    }

    /// Spawn the worker loop on the current runtime.
    pub fn spawn(self) -> WorkerHandle {
        WorkerHandle {
            handle: tokio::spawn(self.run()),
        }
    }

    /// Process tasks until every producer is gone or an upload fails.
    ///
    /// Returns `Ok(())` after a clean drain. An `Err` is always fatal.
    pub async fn run(mut self) -> StorageResult<()> {
        info!("upload worker started");
        while let Some(task) = self.rx.recv().await {
            if let Err(e) = self.upload_task(task).await {
                error!(error = %e, "session upload failed, upload worker stopping");
                self.rx.close();
                return Err(e);
            }
        }
        info!("task queue closed, upload worker exiting");
        Ok(())
    }

    async fn upload_task(&self, task: Task) -> StorageResult<()> {
        let started = Instant::now();
        let session_id = task.id().to_string();
        let total_bytes = task.total_bytes();

        let mut puts = JoinSet::new();
        for (key, data) in task.into_uploads() {
            puts.spawn(put_with_retry(
                Arc::clone(&self.store),
                key,
                data,
                Arc::clone(&self.config),
                Arc::clone(&self.metrics),
            ));
        }

        // Every put is joined even after a failure so none outlives its task.
        let mut first_err = None;
        while let Some(joined) = puts.join_next().await {
            let result = joined.map_err(StorageError::from).and_then(|r| r);
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let elapsed = started.elapsed();
        self.metrics.record_task_upload(elapsed);
        info!(
            session_id = %session_id,
            bytes = total_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "session uploaded"
        );
        Ok(())
    }
}

async fn put_with_retry(
    store: Arc<dyn ObjectStore>,
    key: String,
    data: Bytes,
    config: Arc<StorageConfig>,
    metrics: Arc<StorageMetrics>,
) -> StorageResult<()> {
    let attempts = config.upload_attempts();
    let timeout = Duration::from_secs(config.upload_timeout_secs);
    let backoff = Duration::from_millis(config.retry_backoff_ms);

    let mut last_err = None;
    for attempt in 1..=attempts {
        let put = store.put(key.clone(), data.clone(), config.content_type.clone(), true);
        let err = match tokio::time::timeout(timeout, put).await {
            Ok(Ok(())) => {
                metrics.record_upload(data.len() as u64);
                debug!(key = %key, bytes = data.len(), attempt, "object stored");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => StorageError::UploadTimeout {
                key: key.clone(),
                secs: config.upload_timeout_secs,
            },
        };
        if attempt < attempts {
            warn!(key = %key, attempt, error = %err, "put failed, retrying");
            tokio::time::sleep(backoff).await;
        }
        last_err = Some(err);
    }

    metrics.record_upload_failure();
    Err(match last_err {
        Some(e @ StorageError::UploadTimeout { .. }) if attempts == 1 => e,
        Some(e) => StorageError::UploadFailed {
            key,
            attempts,
            reason: e.to_string(),
        },
        None => StorageError::UploadFailed {
            key,
            attempts,
            reason: "no attempt made".to_string(),
        },
    })
}

/// Handle to a running [`UploadWorker`].
///
/// Resolves when the worker exits: `Ok(())` after a clean drain, or the fatal
/// upload error.
#[derive(Debug)]
pub struct WorkerHandle {
    handle: JoinHandle<StorageResult<()>>,
}

impl WorkerHandle {
    /// True once the worker loop has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to exit.
    pub async fn wait(self) -> StorageResult<()> {
        self.await
    }
}

impl Future for WorkerHandle {
    type Output = StorageResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.map_err(StorageError::from).and_then(|r| r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use crate::segment::{FileType, PreparedSegment};

    fn task(id: &str, dom: &'static [u8], dom_end: Option<&'static [u8]>) -> Task {
        let mut task = Task::new(id, "");
        task.attach(
            FileType::Dom,
            PreparedSegment {
                first: Bytes::from_static(dom),
                second: dom_end.map(Bytes::from_static),
                raw_size: 0,
                encrypted: false,
            },
        );
        task
    }

    fn worker(
        store: Arc<MemoryObjectStore>,
        config: StorageConfig,
    ) -> (mpsc::Sender<Task>, Arc<StorageMetrics>, WorkerHandle) {
        let (tx, rx) = mpsc::channel(1);
        let metrics = Arc::new(StorageMetrics::new());
        let handle = UploadWorker::new(store, rx, Arc::new(config), Arc::clone(&metrics)).spawn();
        (tx, metrics, handle)
    }

    #[tokio::test]
    async fn test_uploads_every_segment_with_fixed_attributes() {
        let store = Arc::new(MemoryObjectStore::new());
        let (tx, metrics, handle) = worker(Arc::clone(&store), StorageConfig::default());

        tx.send(task("5", b"start", Some(b"end"))).await.unwrap();
        drop(tx);
        handle.wait().await.unwrap();

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["5/dom.mobe", "5/dom.mobs"]);
        for put in store.puts() {
            assert_eq!(put.content_type, "application/octet-stream");
            assert!(put.compressed);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.objects_uploaded, 2);
        assert_eq!(snap.upload_bytes, 8);
    }

    #[tokio::test]
    async fn test_put_failure_stops_worker() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_keys_ending_with("dom.mobe");
        let (tx, metrics, handle) = worker(Arc::clone(&store), StorageConfig::default());

        tx.send(task("6", b"start", Some(b"end"))).await.unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, StorageError::UploadFailed { attempts: 1, .. }));
        assert_eq!(metrics.snapshot().upload_failures, 1);

        // The queue is closed once the worker is gone.
        assert!(tx.send(task("8", b"late", None)).await.is_err());
        assert!(store.keys().iter().all(|k| !k.starts_with("8/")));
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_keys_ending_with("dom.mobs");
        let config = StorageConfig {
            upload_retries: 2,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        let (tx, _metrics, handle) = worker(store, config);

        tx.send(task("9", b"start", None)).await.unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_clean_exit_when_producers_drop() {
        let store = Arc::new(MemoryObjectStore::new());
        let (tx, _metrics, handle) = worker(Arc::clone(&store), StorageConfig::default());
        tx.send(task("1", b"a", None)).await.unwrap();
        tx.send(task("2", b"b", None)).await.unwrap();
        drop(tx);

        handle.wait().await.unwrap();
        assert_eq!(store.keys(), vec!["1/dom.mobs", "2/dom.mobs"]);
    }
}
