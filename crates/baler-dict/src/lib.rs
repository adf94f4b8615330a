//! # baler-dict: Dictionary lifecycle
//!
//! Pre-trained zstd dictionaries are what make tiny telemetry batches
//! compress well. This crate owns their whole lifecycle:
//!
//! - [`DictionaryStore`] — maps `topic -> (dict_id, bytes)`, loaded from
//!   `<dict_dir>/<topic>.dict` + `.meta` at startup, reloadable, and able
//!   to sideload a version the collector has not seen yet.
//! - [`EncoderDictCache`] / [`DecoderDictCache`] — small LRU caches of the
//!   *digested* dictionary forms, keyed by `(topic, dict_id)`, so the
//!   expensive digest step runs once per version rather than per batch.
//! - [`train_corpus`] — the one-shot batch trainer. Publishing its output
//!   into a live store is a separate operational step.
//!
//! Dictionaries are immutable once published; a new version gets the next
//! `dict_id` and the store retains the previous version for in-flight
//! frames.

mod cache;
mod error;
mod store;
mod trainer;

pub use cache::{DecoderDictCache, DictCache, EncoderDictCache};
pub use error::{DictError, DictResult};
pub use store::{DictMeta, DictionaryStore};
pub use trainer::{TrainConfig, TrainReport, train_corpus, train_topic};
