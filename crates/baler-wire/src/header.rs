//! Frame header: a small self-describing record carried as canonical JSON.

use baler_types::{Limits, ValidateError, validate_dict_id, validate_topic};
use serde::{Deserialize, Serialize};

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u64 = 1;

/// The self-describing frame header.
///
/// Fields are declared in alphabetical order on purpose: serde serializes
/// struct fields in declaration order, so this is what keeps the header
/// JSON canonical (sorted keys) without a second serialization pass.
///
/// Unknown fields are rejected rather than preserved — the in-memory
/// representation is this fixed record, not a dynamic map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameHeader {
    /// Exact payload length on the wire.
    pub comp_len: u64,
    /// Records in the batch, >= 1.
    pub count: u64,
    /// Dictionary version the batch was compressed against (0 = none).
    pub dict_id: u64,
    /// Compressor level (informational).
    pub level: i32,
    /// Total bytes of the joined canonical batch.
    pub raw_len: u64,
    /// Topic the batch belongs to.
    pub topic: String,
    /// Protocol version (current: 1).
    pub v: u64,
}

impl FrameHeader {
    /// Validates every field against the protocol rules and `limits`.
    pub fn validate(&self, limits: &Limits) -> Result<(), ValidateError> {
        if self.v != PROTOCOL_VERSION {
            return Err(ValidateError::ProtocolVersion(self.v));
        }
        validate_topic(&self.topic)?;
        validate_dict_id(self.dict_id)?;
        if self.count < 1 {
            return Err(ValidateError::CountZero(self.count));
        }
        if self.raw_len < self.count - 1 {
            return Err(ValidateError::RawLenTooSmall {
                raw_len: self.raw_len,
                count: self.count,
            });
        }
        if self.raw_len > limits.max_batch_bytes as u64 {
            return Err(ValidateError::BatchTooLarge {
                len: self.raw_len as usize,
                max: limits.max_batch_bytes,
            });
        }
        // Worst-case zstd expansion for incompressible input, plus framing
        // slack. Anything beyond that cannot be a real payload.
        let comp_bound = self.raw_len + self.raw_len / 255 + 512;
        if self.comp_len > comp_bound {
            return Err(ValidateError::CompLenOutOfRange {
                comp_len: self.comp_len,
                raw_len: self.raw_len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> FrameHeader {
        FrameHeader {
            comp_len: 42,
            count: 3,
            dict_id: 1,
            level: 7,
            raw_len: 120,
            topic: "events".to_owned(),
            v: PROTOCOL_VERSION,
        }
    }

    #[test]
    fn serializes_with_sorted_keys() {
        let json = serde_json::to_string(&header()).unwrap();
        assert_eq!(
            json,
            r#"{"comp_len":42,"count":3,"dict_id":1,"level":7,"raw_len":120,"topic":"events","v":1}"#
        );
    }

    #[test]
    fn unknown_fields_rejected() {
        let json = r#"{"comp_len":1,"count":1,"dict_id":0,"level":7,"raw_len":1,"topic":"t","v":1,"extra":true}"#;
        assert!(serde_json::from_str::<FrameHeader>(json).is_err());
    }

    #[test]
    fn missing_field_rejected() {
        let json = r#"{"count":1,"dict_id":0,"level":7,"raw_len":1,"topic":"t","v":1}"#;
        assert!(serde_json::from_str::<FrameHeader>(json).is_err());
    }

    #[test]
    fn validate_accepts_good_header() {
        header().validate(&Limits::default()).unwrap();
    }

    #[test]
    fn validate_rejects_bad_version() {
        let mut h = header();
        h.v = 2;
        assert!(matches!(
            h.validate(&Limits::default()),
            Err(ValidateError::ProtocolVersion(2))
        ));
    }

    #[test]
    fn validate_rejects_zero_count() {
        let mut h = header();
        h.count = 0;
        assert!(matches!(
            h.validate(&Limits::default()),
            Err(ValidateError::CountZero(0))
        ));
    }

    #[test]
    fn validate_rejects_short_raw_len() {
        let mut h = header();
        h.count = 10;
        h.raw_len = 8;
        assert!(matches!(
            h.validate(&Limits::default()),
            Err(ValidateError::RawLenTooSmall { raw_len: 8, count: 10 })
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_dict_id() {
        let mut h = header();
        h.dict_id = 1 << 31;
        assert!(matches!(
            h.validate(&Limits::default()),
            Err(ValidateError::DictIdOutOfRange(_))
        ));
    }

    #[test]
    fn validate_rejects_oversized_batch() {
        let mut h = header();
        h.raw_len = 101 * 1024 * 1024;
        h.comp_len = 1;
        assert!(matches!(
            h.validate(&Limits::default()),
            Err(ValidateError::BatchTooLarge { .. })
        ));
    }

    #[test]
    fn validate_rejects_implausible_comp_len() {
        let mut h = header();
        h.raw_len = 100;
        h.comp_len = 10_000;
        assert!(matches!(
            h.validate(&Limits::default()),
            Err(ValidateError::CompLenOutOfRange { .. })
        ));
    }

    #[test]
    fn raw_len_equal_to_separators_only_is_valid() {
        // count - 1 separators and zero-length records is degenerate but
        // in range; the length check is exactly `raw_len >= count - 1`.
        let mut h = header();
        h.count = 5;
        h.raw_len = 4;
        h.comp_len = 4;
        h.validate(&Limits::default()).unwrap();
    }
}
