//! Message normalization with per-topic volatile-field sets.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use baler_types::{ValidateError, canonical_bytes};

/// Produces canonical bytes for messages, stripping per-topic volatile keys.
///
/// Volatile keys are fields that change on every message (trace ids,
/// request ids) without carrying structure worth compressing; removing them
/// before serialization is what keeps small dictionaries effective.
#[derive(Debug, Default)]
pub struct Normalizer {
    /// Keys stripped for every topic.
    default_volatile: BTreeSet<String>,
    /// Per-topic overrides, merged with the defaults at registration time.
    per_topic: HashMap<String, BTreeSet<String>>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets keys stripped from every topic's messages.
    pub fn with_default_volatile<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_volatile = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Registers extra volatile keys for one topic.
    pub fn set_topic_volatile<I, S>(&mut self, topic: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self.default_volatile.clone();
        set.extend(keys.into_iter().map(Into::into));
        self.per_topic.insert(topic.to_owned(), set);
    }

    /// Normalizes one message for `topic`.
    pub fn normalize(&self, topic: &str, msg: &Value) -> Result<Vec<u8>, ValidateError> {
        let volatile = self.per_topic.get(topic).unwrap_or(&self.default_volatile);
        canonical_bytes(msg, volatile)
    }
}
