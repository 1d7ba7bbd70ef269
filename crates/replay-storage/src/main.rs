#![warn(missing_docs)]

//! Session replay storage daemon.
//!
//! Reads newline-delimited session-end events from stdin and uploads each
//! session's captures. Exits non-zero when an upload fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use replay_storage::{LocalObjectStore, SessionEnd, SessionStorage, StorageConfig, StorageMetrics};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "replay-storage", version, about = "Upload recorded sessions to object storage")]
struct Args {
    /// Config file (.toml or .json)
    #[arg(short, long, env = "REPLAY_STORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the capture directory
    #[arg(long, env = "REPLAY_STORAGE_FS_DIR")]
    fs_dir: Option<PathBuf>,

    /// Directory objects are written to
    #[arg(long, env = "REPLAY_STORAGE_STORE_DIR", default_value = "./objects")]
    store_dir: PathBuf,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print metrics in Prometheus text format on exit
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if args.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    tracing::info!("replay storage starting...");

    let mut config = match &args.config {
        Some(path) => StorageConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StorageConfig::default(),
    };
    if let Some(fs_dir) = args.fs_dir.clone() {
        config.fs_dir = fs_dir;
    }

    let metrics = Arc::new(StorageMetrics::new());
    let store = Arc::new(LocalObjectStore::new(args.store_dir.clone()));
    let (storage, mut worker) = SessionStorage::start(config, store, Arc::clone(&metrics))?;
    tracing::info!(
        fs_dir = %storage.config().fs_dir.display(),
        store_dir = %args.store_dir.display(),
        "pipeline ready"
    );

    let ingested = tokio::select! {
        ingested = ingest(&storage) => Some(ingested),
        stopped = &mut worker => {
            if let Err(e) = stopped {
                tracing::error!(error = %e, "fatal upload failure, exiting");
                std::process::exit(1);
            }
            tracing::warn!("upload worker exited early");
            None
        }
    };

    if let Some(ingested) = ingested {
        drop(storage);
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "fatal upload failure, exiting");
            std::process::exit(1);
        }
        ingested?;
    }

    if args.prometheus {
        print!("{}", metrics.render_prometheus());
    }
    let snapshot = metrics.snapshot();
    tracing::info!(
        sessions = snapshot.sessions_total,
        objects = snapshot.objects_uploaded,
        bytes = snapshot.upload_bytes,
        skipped = snapshot.segments_skipped,
        "replay storage stopped"
    );
    Ok(())
}

async fn ingest(storage: &SessionStorage) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event = match SessionEnd::from_json_line(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed event");
                continue;
            }
        };
        storage
            .upload(event.session_id, &event.encryption_key)
            .await?;
    }
    tracing::info!("input closed, draining upload queue");
    Ok(())
}
