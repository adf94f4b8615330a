//! Dictionary store and trainer error types.

use std::path::PathBuf;

use baler_types::ValidateError;
use thiserror::Error;

/// Result type for dictionary operations.
pub type DictResult<T> = Result<T, DictError>;

/// Errors raised by the dictionary store and trainer.
#[derive(Debug, Error)]
pub enum DictError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar metadata file was unreadable or inconsistent.
    #[error("bad dictionary metadata at {path}: {reason}")]
    BadMeta { path: PathBuf, reason: String },

    /// Topic name failed validation.
    #[error(transparent)]
    InvalidTopic(#[from] ValidateError),

    /// No usable samples for a topic.
    #[error("no samples found for topic {0:?}")]
    EmptyCorpus(String),
}
