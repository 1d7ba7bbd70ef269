//! Capture file preparation: size guard, DOM split, encrypt, compress.
//!
//! Read path: Disk -> Size guard -> Read -> [Split (DOM only)] -> Encrypt -> Compress
//!
//! Each piece is encrypted before it is compressed, so every stored object is a
//! plain stream of the configured compression format and decoding it yields
//! the sealed piece.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::compression::compress;
use crate::config::StorageConfig;
use crate::encryption::{encrypt_or_passthrough, SessionKey};
use crate::error::{StorageError, StorageResult};
use crate::metrics::StorageMetrics;

/// Suffix appended to a session's base path to find its devtools capture.
pub const DEVTOOLS_SUFFIX: &str = "devtools";

/// Which capture file a preparation call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// DOM mutation log; may be split in two.
    Dom,
    /// Devtools log; never split, often absent.
    Devtools,
}

impl FileType {
    /// Resolve the capture path for this kind from the session's base path.
    pub fn capture_path(&self, base: &Path) -> PathBuf {
        match self {
            FileType::Dom => base.to_path_buf(),
            FileType::Devtools => {
                let mut p = base.as_os_str().to_owned();
                p.push(DEVTOOLS_SUFFIX);
                PathBuf::from(p)
            }
        }
    }

    /// Short label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Dom => "dom",
            FileType::Devtools => "devtools",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of preparing one capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSegment {
    /// The whole capture, or the part before the split offset.
    pub first: Bytes,
    /// The part from the split offset on; only set for split DOM captures.
    pub second: Option<Bytes>,
    /// Raw bytes read from disk.
    pub raw_size: u64,
    /// Whether the pieces were encrypted.
    pub encrypted: bool,
}

/// Read a capture file into memory, refusing files above `max_file_size`.
///
/// The size is checked from metadata before any byte is read.
pub async fn read_capture(path: &Path, max_file_size: u64) -> StorageResult<Bytes> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::SegmentMissing {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    if meta.len() > max_file_size {
        return Err(StorageError::SizeLimitExceeded {
            path: path.to_path_buf(),
            size: meta.len(),
            limit: max_file_size,
        });
    }
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Bytes::from(raw)),
        // Recorder cleanup can race the read.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::SegmentMissing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Encrypt (when keyed) and compress one piece on the blocking pool.
async fn seal_piece(
    piece: Bytes,
    key: Option<Arc<SessionKey>>,
    config: Arc<StorageConfig>,
) -> StorageResult<(Bytes, bool)> {
    tokio::task::spawn_blocking(move || -> StorageResult<(Bytes, bool)> {
        let (payload, encrypted) =
            encrypt_or_passthrough(&piece, key.as_deref(), config.encryption);
        let compressed = compress(&payload, config.compression)?;
        Ok((Bytes::from(compressed), encrypted))
    })
    .await?
}

/// Prepare one capture file of a session.
///
/// Returns `SegmentMissing` when the file does not exist; the caller decides
/// whether that is normal (devtools) or worth a warning (DOM).
pub async fn prepare_segment(
    base: &Path,
    kind: FileType,
    secret: &str,
    config: Arc<StorageConfig>,
    metrics: &StorageMetrics,
) -> StorageResult<PreparedSegment> {
    let path = kind.capture_path(base);

    let read_started = Instant::now();
    let raw = read_capture(&path, config.max_file_size).await?;
    metrics.record_read(read_started.elapsed());
    let raw_size = raw.len() as u64;
    match kind {
        FileType::Dom => metrics.record_dom_size(raw_size),
        FileType::Devtools => metrics.record_devtools_size(raw_size),
    }

    let key = match SessionKey::from_secret(secret) {
        Ok(key) => key.map(Arc::new),
        Err(e) => {
            warn!(error = %e, kind = %kind, "unusable encryption key, storing plaintext");
            None
        }
    };

    let archive_started = Instant::now();
    let split = config.file_split_size;
    let segment = if kind == FileType::Dom && raw.len() > split {
        let head = raw.slice(..split);
        let tail = raw.slice(split..);
        let ((first, enc_first), (second, enc_second)) = tokio::try_join!(
            seal_piece(head, key.clone(), Arc::clone(&config)),
            seal_piece(tail, key, Arc::clone(&config)),
        )?;
        PreparedSegment {
            first,
            second: Some(second),
            raw_size,
            encrypted: enc_first && enc_second,
        }
    } else {
        let (first, encrypted) = seal_piece(raw, key, Arc::clone(&config)).await?;
        PreparedSegment {
            first,
            second: None,
            raw_size,
            encrypted,
        }
    };
    metrics.record_archive(archive_started.elapsed());

    debug!(
        kind = %kind,
        raw = raw_size,
        first = segment.first.len(),
        second = segment.second.as_ref().map_or(0, |b| b.len()),
        encrypted = segment.encrypted,
        "capture prepared"
    );
    Ok(segment)
}
