//! # baler-types: Core types for the baler pipeline
//!
//! This crate contains shared types used across the baler system:
//! - Identity types ([`Topic`], [`DictId`])
//! - Canonical serialization ([`canonical_bytes`], [`RECORD_SEPARATOR`])
//! - Input validation ([`Limits`], [`ValidateError`])
//! - Pipeline counters ([`PipelineMetrics`], [`MetricsSnapshot`])
//!
//! Everything here is shared between the edge agent and the collector, so
//! this crate stays free of I/O and threading beyond the atomic counters.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

mod canonical;
mod metrics;
mod validate;

pub use canonical::{RECORD_SEPARATOR, canonical_bytes, join_records};
pub use metrics::{MetricsSnapshot, PipelineMetrics, TopicCounters, TopicSnapshot};
pub use validate::{
    DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_MESSAGE_BYTES, Limits, MAX_DICT_ID, TOPIC_MAX_LEN,
    ValidateError, validate_dict_id, validate_topic,
};

/// Dictionary version for one topic.
///
/// Assigned monotonically when a new dictionary replaces the previous one.
/// `DictId::NONE` (0) is reserved to mean "no dictionary" — batches carrying
/// it are compressed against an empty dictionary. Valid values stay below
/// 2^31 so the id survives round trips through JSON integers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct DictId(u32);

impl DictId {
    /// The reserved "no dictionary" version.
    pub const NONE: DictId = DictId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the id as a raw `u32`.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true if this is the reserved "no dictionary" id.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns the next id in the per-topic sequence.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for DictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DictId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<DictId> for u32 {
    fn from(id: DictId) -> Self {
        id.0
    }
}

/// A validated topic name.
///
/// Topics label logical message streams and double as file-name components
/// on both sides of the pipeline, so the character set is restricted to
/// `[A-Za-z0-9._-]` (max 128 chars, no `..`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Parses and validates a topic name.
    pub fn parse(name: &str) -> Result<Self, ValidateError> {
        validate_topic(name)?;
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Topic::parse(&name).map_err(serde::de::Error::custom)
    }
}
