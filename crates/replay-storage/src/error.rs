//! Error types for the replay-storage pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// All errors that can occur while preparing or uploading session artifacts.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Capture file does not exist on disk.
    #[error("capture file not found: {}", path.display())]
    SegmentMissing {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// Capture file is larger than the configured read limit.
    #[error("capture file too big: {} is {size} bytes, limit {limit}", path.display())]
    SizeLimitExceeded {
        /// Path of the oversized file.
        path: PathBuf,
        /// Size reported by the filesystem.
        size: u64,
        /// Configured `max_file_size`.
        limit: u64,
    },

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression operation failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression operation failed.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption authentication tag mismatch.
    #[error("decryption failed: authentication tag mismatch (data may be corrupted)")]
    DecryptionAuthFailed,

    /// Session encryption key cannot be used.
    #[error("invalid encryption key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// Object store rejected a put after all attempts.
    #[error("upload of {key} failed after {attempts} attempt(s): {reason}")]
    UploadFailed {
        /// Object key of the failed put.
        key: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last error reported by the store.
        reason: String,
    },

    /// A single put did not finish within the configured timeout.
    #[error("upload of {key} timed out after {secs}s")]
    UploadTimeout {
        /// Object key of the put.
        key: String,
        /// Timeout that elapsed.
        secs: u64,
    },

    /// The upload worker has terminated and no longer accepts tasks.
    #[error("upload worker stopped")]
    WorkerStopped,

    /// A spawned preparation or upload task panicked or was cancelled.
    #[error("task join error: {0}")]
    TaskJoin(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Returns true if the error means the capture file is simply absent.
    pub fn is_missing(&self) -> bool {
        matches!(self, StorageError::SegmentMissing { .. })
    }

    /// Returns true for errors the upload worker must escalate to process exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed { .. } | StorageError::UploadTimeout { .. }
        )
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::TaskJoin(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_is_distinguished_from_io() {
        let missing = StorageError::SegmentMissing {
            path: PathBuf::from("/tmp/42devtools"),
        };
        assert!(missing.is_missing());

        let io = StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!io.is_missing());
    }

    #[test]
    fn upload_errors_are_fatal() {
        let failed = StorageError::UploadFailed {
            key: "42/dom.mobs".to_string(),
            attempts: 1,
            reason: "connection reset".to_string(),
        };
        assert!(failed.is_fatal());
        assert!(StorageError::UploadTimeout {
            key: "42/dom.mobs".to_string(),
            secs: 30,
        }
        .is_fatal());
        assert!(!StorageError::WorkerStopped.is_fatal());
    }

    #[test]
    fn size_limit_message_mentions_sizes() {
        let err = StorageError::SizeLimitExceeded {
            path: PathBuf::from("/mnt/efs/7"),
            size: 2048,
            limit: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("/mnt/efs/7"));
    }
}
