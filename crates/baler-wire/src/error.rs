//! Wire protocol error types.

use baler_types::ValidateError;
use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while framing or deframing.
///
/// Everything except [`WireError::Eof`] is a protocol error: the peer sent
/// bytes we cannot trust, and the caller is expected to close the
/// connection.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the connection cleanly between frames.
    #[error("connection closed")]
    Eof,

    /// I/O failure or short read inside a frame.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Header JSON longer than the u16 length prefix can carry.
    #[error("header of {0} bytes exceeds the u16 length prefix")]
    HeaderTooLong(usize),

    /// Header bytes did not parse as the expected JSON record.
    #[error("malformed frame header: {0}")]
    BadHeader(String),

    /// Header parsed but failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidateError),

    /// Frame constructed with a payload that contradicts its header.
    #[error("payload is {actual} bytes but header says comp_len={expected}")]
    PayloadLenMismatch { expected: u64, actual: usize },
}
