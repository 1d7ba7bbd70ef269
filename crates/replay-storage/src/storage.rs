//! Upload orchestrator: turns a finished session into a queued [`Task`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::metrics::StorageMetrics;
use crate::object_store::ObjectStore;
use crate::segment::{prepare_segment, FileType};
use crate::task::Task;
use crate::worker::{UploadWorker, WorkerHandle};

/// Tasks the hand-off queue holds before `upload` blocks.
pub const QUEUE_CAPACITY: usize = 1;

/// Producer side of the pipeline. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct SessionStorage {
    config: Arc<StorageConfig>,
    metrics: Arc<StorageMetrics>,
    tasks: mpsc::Sender<Task>,
}

impl SessionStorage {
    /// Validate `config`, spawn the upload worker and return both ends.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: StorageConfig,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<StorageMetrics>,
    ) -> StorageResult<(Self, WorkerHandle)> {
        config.validate()?;
        let config = Arc::new(config);
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle =
            UploadWorker::new(store, rx, Arc::clone(&config), Arc::clone(&metrics)).spawn();
        Ok((
            Self {
                config,
                metrics,
                tasks: tx,
            },
            handle,
        ))
    }

    /// Active configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Shared metrics registry.
    pub fn metrics(&self) -> &Arc<StorageMetrics> {
        &self.metrics
    }

    /// Base capture path of a session; the devtools capture adds a suffix.
    pub fn session_path(&self, session_id: u64) -> PathBuf {
        self.config.fs_dir.join(session_id.to_string())
    }

    /// Prepare both captures of a session and hand them to the worker.
    ///
    /// Segment failures are logged and leave that segment out. Waits while the
    /// queue slot is taken, and returns once the task is queued, not uploaded.
    /// Fails only with [`StorageError::WorkerStopped`].
    #[instrument(skip(self, encryption_key))]
    pub async fn upload(&self, session_id: u64, encryption_key: &str) -> StorageResult<()> {
        let base = self.session_path(session_id);

        let (dom, devtools) = tokio::join!(
            prepare_segment(
                &base,
                FileType::Dom,
                encryption_key,
                Arc::clone(&self.config),
                &self.metrics,
            ),
            prepare_segment(
                &base,
                FileType::Devtools,
                encryption_key,
                Arc::clone(&self.config),
                &self.metrics,
            ),
        );

        let mut task = Task::new(session_id.to_string(), encryption_key);
        for (kind, prepared) in [(FileType::Dom, dom), (FileType::Devtools, devtools)] {
            match prepared {
                Ok(segment) => task.attach(kind, segment),
                Err(e) => {
                    self.metrics.record_segment_skipped();
                    if e.is_missing() && kind == FileType::Devtools {
                        debug!(kind = %kind, "no devtools capture");
                    } else {
                        warn!(kind = %kind, error = %e, "capture skipped");
                    }
                }
            }
        }

        if task.is_empty() {
            warn!("nothing to upload for session");
            return Ok(());
        }

        debug!(segments = task.segment_count(), bytes = task.total_bytes(), "queueing task");
        self.tasks
            .send(task)
            .await
            .map_err(|_| StorageError::WorkerStopped)?;
        self.metrics.record_session();
        Ok(())
    }
}
