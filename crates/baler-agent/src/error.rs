//! Agent error types.

use baler_types::ValidateError;
use baler_wire::WireError;
use thiserror::Error;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur inside the edge agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Message or topic rejected by validation.
    #[error(transparent)]
    Invalid(#[from] ValidateError),

    /// Compressor failure for one batch.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Wire framing failure.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Submit after shutdown began.
    #[error("agent is shut down")]
    Shutdown,
}
