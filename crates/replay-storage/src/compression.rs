//! Zstd and LZ4 compression for capture segments

use crate::error::StorageError;
use serde::{Deserialize, Serialize};

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Zstandard; level 1 is the fast preset used on the session-end hot path
    Zstd {
        /// Compression level (1=fastest, 19=best ratio)
        level: i32,
    },
    /// LZ4 frame format, lowest CPU cost per byte
    Lz4,
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::Zstd { level: 1 }
    }
}

impl CompressionAlgorithm {
    /// HTTP `Content-Encoding` token for objects written with this algorithm.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Zstd { .. } => "zstd",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

/// Compress data with the given algorithm. Returns compressed bytes.
pub fn compress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, StorageError> {
    match algo {
        CompressionAlgorithm::Zstd { level } => {
            zstd::encode_all(data, level).map_err(|e| StorageError::CompressionFailed(e.to_string()))
        }
        CompressionAlgorithm::Lz4 => {
            use std::io::Write;
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::with_capacity(data.len() / 2));
            encoder
                .write_all(data)
                .map_err(|e| StorageError::CompressionFailed(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| StorageError::CompressionFailed(e.to_string()))
        }
    }
}

/// Decompress data using the algorithm that was used for compression.
pub fn decompress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, StorageError> {
    match algo {
        CompressionAlgorithm::Zstd { .. } => {
            zstd::decode_all(data).map_err(|e| StorageError::DecompressionFailed(e.to_string()))
        }
        CompressionAlgorithm::Lz4 => {
            use std::io::Read;
            let mut decoder = lz4_flex::frame::FrameDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| StorageError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
    }
}
