#![warn(missing_docs)]

//! Session replay storage: capture file split, compression (Zstd/LZ4), encryption (AES-GCM), object store upload
//!
//! Write path: Capture file → Size guard → Split (DOM) → Encrypt → Compress → Queue (1) → Parallel put
//! Read path:  Object → Decompress → Decrypt → Concatenate pieces

pub mod compression;
pub mod config;
pub mod encryption;
pub mod error;
pub mod event;
pub mod metrics;
pub mod object_store;
pub mod segment;
pub mod storage;
pub mod task;
pub mod worker;

pub use compression::{compress, decompress, CompressionAlgorithm};
pub use config::StorageConfig;
pub use encryption::{decrypt, encrypt, EncryptionAlgorithm, SessionKey};
pub use error::{StorageError, StorageResult};
pub use event::SessionEnd;
pub use metrics::{MetricKind, MetricValue, MetricsSnapshot, StorageMetric, StorageMetrics};
pub use object_store::{BoxFuture, LocalObjectStore, MemoryObjectStore, ObjectStore, PutRecord};
pub use segment::{prepare_segment, FileType, PreparedSegment};
pub use storage::SessionStorage;
pub use task::{SegmentName, Task};
pub use worker::{UploadWorker, WorkerHandle};
