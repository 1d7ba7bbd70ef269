//! Pipeline configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compression::CompressionAlgorithm;
use crate::encryption::EncryptionAlgorithm;
use crate::error::{StorageError, StorageResult};

/// Content type attached to every uploaded segment by default.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Settings for the capture preparation and upload stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory the recorder writes capture files into.
    pub fs_dir: PathBuf,
    /// Capture files larger than this are never read into memory.
    pub max_file_size: u64,
    /// DOM captures larger than this are split at this byte offset.
    pub file_split_size: usize,
    /// Compressor applied to every segment.
    pub compression: CompressionAlgorithm,
    /// Cipher used when a session carries an encryption key.
    pub encryption: EncryptionAlgorithm,
    /// Content type passed to the object store.
    pub content_type: String,
    /// Per-put timeout; an elapsed timeout counts as an upload failure.
    pub upload_timeout_secs: u64,
    /// Extra attempts per put before the failure becomes fatal. 0 = fail fast.
    pub upload_retries: u32,
    /// Delay between put attempts.
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fs_dir: PathBuf::from("/mnt/efs"),
            max_file_size: 524_288_000,
            file_split_size: 300_000,
            compression: CompressionAlgorithm::default(),
            encryption: EncryptionAlgorithm::default(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            upload_timeout_secs: 300,
            upload_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

impl StorageConfig {
    /// Load from a `.toml` or `.json` file and validate.
    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: StorageConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| StorageError::Config(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| StorageError::Config(e.to_string()))?
            }
            _ => {
                return Err(StorageError::Config(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> StorageResult<()> {
        if self.fs_dir.as_os_str().is_empty() {
            return Err(StorageError::Config("fs_dir is empty".to_string()));
        }
        if self.max_file_size == 0 {
            return Err(StorageError::Config("max_file_size must be > 0".to_string()));
        }
        if self.file_split_size == 0 {
            return Err(StorageError::Config("file_split_size must be > 0".to_string()));
        }
        if self.file_split_size as u64 >= self.max_file_size {
            return Err(StorageError::Config(format!(
                "file_split_size {} must be below max_file_size {}",
                self.file_split_size, self.max_file_size
            )));
        }
        if self.upload_timeout_secs == 0 {
            return Err(StorageError::Config(
                "upload_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.content_type.is_empty() {
            return Err(StorageError::Config("content_type is empty".to_string()));
        }
        Ok(())
    }

    /// Total attempts made for a single put.
    pub fn upload_attempts(&self) -> u32 {
        self.upload_retries.saturating_add(1)
    }
}
