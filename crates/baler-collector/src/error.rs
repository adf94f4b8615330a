//! Collector error types.

use std::net::SocketAddr;

use baler_dict::DictError;
use baler_types::DictId;
use baler_wire::WireError;
use thiserror::Error;

/// Result type for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors that can occur in the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Bind failed at startup (exit code 3 territory).
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// Dictionary store error.
    #[error("dictionary error: {0}")]
    Dict(#[from] DictError),

    /// Frame references a dictionary that is not resident and cannot be
    /// sideloaded. The frame is rejected; the connection stays up.
    #[error("unknown dictionary {dict_id} for topic {topic}")]
    UnknownDict { topic: String, dict_id: DictId },

    /// Payload contradicts its header (decompression failure or length
    /// mismatch). The frame is rejected and the connection closed.
    #[error("corrupt frame for topic {topic}: {reason}")]
    CorruptFrame { topic: String, reason: String },
}
