//! Input validation for topics, message sizes, and frame headers.
//!
//! Every rejection carries a specific [`ValidateError`] kind so callers can
//! count them separately and tests can assert on the exact failure.

use thiserror::Error;

/// Maximum length of a topic name in bytes.
pub const TOPIC_MAX_LEN: usize = 128;

/// Largest dictionary id accepted on the wire (ids live in `[0, 2^31)`).
pub const MAX_DICT_ID: u32 = (1 << 31) - 1;

/// Default ceiling for a single message's canonical bytes (10 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Default ceiling for a batch's joined canonical bytes (100 MiB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 100 * 1024 * 1024;

/// Validation failures, each with its own kind.
#[derive(Debug, Error)]
pub enum ValidateError {
    /// Input was not a JSON object or could not be canonicalized.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// Topic name failed the character/length rules.
    #[error("invalid topic {name:?}: {reason}")]
    InvalidTopic { name: String, reason: &'static str },

    /// A single message exceeded the configured ceiling.
    #[error("message of {len} bytes exceeds limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// A batch exceeded the configured ceiling.
    #[error("batch of {len} bytes exceeds limit of {max}")]
    BatchTooLarge { len: usize, max: usize },

    /// Dictionary id outside `[0, 2^31)`.
    #[error("dict_id {0} out of range")]
    DictIdOutOfRange(u64),

    /// Unsupported protocol version in a frame header.
    #[error("unsupported protocol version {0}")]
    ProtocolVersion(u64),

    /// Frame header claimed fewer than one record.
    #[error("frame count must be >= 1, got {0}")]
    CountZero(u64),

    /// `raw_len` cannot even hold the record separators.
    #[error("raw_len {raw_len} too small for {count} records")]
    RawLenTooSmall { raw_len: u64, count: u64 },

    /// `comp_len` exceeds any plausible compressed size for `raw_len`.
    #[error("comp_len {comp_len} implausible for raw_len {raw_len}")]
    CompLenOutOfRange { comp_len: u64, raw_len: u64 },
}

/// Size ceilings enforced at the pipeline edges.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum canonical bytes for a single message.
    pub max_message_bytes: usize,
    /// Maximum joined canonical bytes for a batch.
    pub max_batch_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

impl Limits {
    pub fn new(max_message_bytes: usize, max_batch_bytes: usize) -> Self {
        Self {
            max_message_bytes,
            max_batch_bytes,
        }
    }

    /// Checks a single message's canonical length.
    pub fn check_message(&self, len: usize) -> Result<(), ValidateError> {
        if len > self.max_message_bytes {
            return Err(ValidateError::MessageTooLarge {
                len,
                max: self.max_message_bytes,
            });
        }
        Ok(())
    }

    /// Checks a batch's joined length.
    pub fn check_batch(&self, len: usize) -> Result<(), ValidateError> {
        if len > self.max_batch_bytes {
            return Err(ValidateError::BatchTooLarge {
                len,
                max: self.max_batch_bytes,
            });
        }
        Ok(())
    }
}

/// Validates a topic name: `[A-Za-z0-9._-]{1,128}`, no `..`.
///
/// The `..` rule is belt-and-braces on top of the character set — topics
/// become path components under `out_dir` and `dict_dir`.
pub fn validate_topic(name: &str) -> Result<(), ValidateError> {
    if name.is_empty() {
        return Err(ValidateError::InvalidTopic {
            name: name.to_owned(),
            reason: "empty",
        });
    }
    if name.len() > TOPIC_MAX_LEN {
        return Err(ValidateError::InvalidTopic {
            name: name.to_owned(),
            reason: "longer than 128 bytes",
        });
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err(ValidateError::InvalidTopic {
            name: name.to_owned(),
            reason: "contains characters outside [A-Za-z0-9._-]",
        });
    }
    if name.contains("..") {
        return Err(ValidateError::InvalidTopic {
            name: name.to_owned(),
            reason: "contains `..`",
        });
    }
    Ok(())
}

/// Validates a dictionary id from an untrusted header.
pub fn validate_dict_id(id: u64) -> Result<(), ValidateError> {
    if id > u64::from(MAX_DICT_ID) {
        return Err(ValidateError::DictIdOutOfRange(id));
    }
    Ok(())
}
