//! Blob store errors.

use thiserror::Error;

/// Blob store error types.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Blob not found (never stored, deleted, or already swept).
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// Payload exceeds the configured per-blob cap.
    #[error("Blob too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    /// Sidecar serialization error.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
