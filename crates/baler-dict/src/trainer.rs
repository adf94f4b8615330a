//! Corpus-based dictionary training.
//!
//! One-shot batch job: reads `samples_root/<topic>/*.json[l]`, normalizes
//! every record, and trains a fixed-size zstd dictionary per topic. The
//! output lands in `dict_dir` as `<topic>.dict` + `<topic>.meta`;
//! publishing into a live store is a separate operational step.
//!
//! When a topic has too few sample bytes for the trainer (or the training
//! algorithm itself fails), the fallback is a raw prefix dictionary: the
//! first `dict_size` bytes of the joined corpus. Its compression
//! effectiveness is substantially worse, so the outcome is flagged in the
//! report and logged at WARN.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use chrono::Utc;

use baler_types::{DictId, canonical_bytes, join_records, validate_topic};

use crate::error::{DictError, DictResult};
use crate::store::{DictMeta, read_meta, write_pair};

/// Trainer parameters.
#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    /// Target dictionary size in bytes (typically 4 KiB or 8 KiB).
    pub dict_size: usize,
    /// Minimum corpus size as a multiple of `dict_size` before the real
    /// trainer is attempted.
    pub min_sample_factor: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dict_size: 4096,
            min_sample_factor: 200,
        }
    }
}

/// Outcome of training one topic.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub topic: String,
    pub dict_id: DictId,
    pub dict_size: usize,
    pub sample_records: usize,
    pub sample_bytes: usize,
    /// True when the raw-prefix fallback was used instead of the trainer.
    pub fallback: bool,
}

/// Trains dictionaries for every topic directory under `samples_root`.
pub fn train_corpus(
    samples_root: impl AsRef<Path>,
    dict_dir: impl AsRef<Path>,
    config: &TrainConfig,
) -> DictResult<Vec<TrainReport>> {
    let samples_root = samples_root.as_ref();
    let dict_dir = dict_dir.as_ref();

    let mut topics: Vec<String> = Vec::new();
    for entry in fs::read_dir(samples_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(topic) = name.to_str() else { continue };
        if validate_topic(topic).is_err() {
            tracing::warn!(dir = topic, "skipping sample directory with invalid topic name");
            continue;
        }
        topics.push(topic.to_owned());
    }
    topics.sort();

    let mut reports = Vec::with_capacity(topics.len());
    for topic in topics {
        let report = train_topic(&samples_root.join(&topic), &topic, dict_dir, config)?;
        reports.push(report);
    }
    Ok(reports)
}

/// Trains a dictionary for one topic from its sample directory.
pub fn train_topic(
    sample_dir: &Path,
    topic: &str,
    dict_dir: &Path,
    config: &TrainConfig,
) -> DictResult<TrainReport> {
    validate_topic(topic)?;
    let records = collect_records(sample_dir)?;
    if records.is_empty() {
        return Err(DictError::EmptyCorpus(topic.to_owned()));
    }

    let sample_bytes: usize = records.iter().map(Vec::len).sum();
    let min_bytes = config.dict_size * config.min_sample_factor;

    let (dict, fallback) = if sample_bytes < min_bytes {
        tracing::warn!(
            topic,
            sample_bytes,
            min_bytes,
            "corpus too small for dictionary training, falling back to raw prefix"
        );
        (prefix_dictionary(&records, config.dict_size), true)
    } else {
        let concatenated: Vec<u8> = records.concat();
        let sizes: Vec<usize> = records.iter().map(Vec::len).collect();
        match zstd::dict::from_continuous(&concatenated, &sizes, config.dict_size) {
            Ok(dict) => (dict, false),
            Err(e) => {
                tracing::warn!(
                    topic,
                    error = %e,
                    "dictionary training failed, falling back to raw prefix"
                );
                (prefix_dictionary(&records, config.dict_size), true)
            }
        }
    };

    let next_id = read_meta(dict_dir, topic)
        .map_or(DictId::NONE, |m| m.dict_id)
        .next();
    let meta = DictMeta {
        dict_id: next_id,
        created_at: Utc::now(),
        size: dict.len(),
    };
    write_pair(dict_dir, topic, &meta, &dict)?;

    tracing::info!(
        topic,
        dict_id = %next_id,
        dict_size = dict.len(),
        sample_records = records.len(),
        sample_bytes,
        fallback,
        "dictionary written"
    );

    Ok(TrainReport {
        topic: topic.to_owned(),
        dict_id: next_id,
        dict_size: dict.len(),
        sample_records: records.len(),
        sample_bytes,
        fallback,
    })
}

/// First `size` bytes of the joined corpus (the bootstrap path).
fn prefix_dictionary(records: &[Vec<u8>], size: usize) -> Vec<u8> {
    let mut joined = join_records(records);
    joined.truncate(size);
    joined
}

/// Reads and normalizes every record in a topic's sample directory.
///
/// `.jsonl` files contribute one record per non-empty line; `.json` files
/// contribute their top-level object, or each element of a top-level
/// array. Records that fail to parse or normalize are skipped with a
/// warning — a training corpus is allowed to be partially dirty.
fn collect_records(sample_dir: &Path) -> DictResult<Vec<Vec<u8>>> {
    let no_volatile = BTreeSet::new();
    let mut paths: Vec<_> = fs::read_dir(sample_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("json" | "jsonl")
            )
        })
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let is_jsonl = path.extension().and_then(|e| e.to_str()) == Some("jsonl");
        let content = fs::read_to_string(&path)?;
        if is_jsonl {
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<serde_json::Value>(line) {
                    Ok(value) => match canonical_bytes(&value, &no_volatile) {
                        Ok(bytes) => records.push(bytes),
                        Err(e) => {
                            tracing::warn!(file = %path.display(), error = %e, "skipping sample record");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "skipping unparsable sample line");
                    }
                }
            }
        } else {
            match serde_json::from_str::<serde_json::Value>(&content) {
                Ok(serde_json::Value::Array(items)) => {
                    for item in items {
                        match canonical_bytes(&item, &no_volatile) {
                            Ok(bytes) => records.push(bytes),
                            Err(e) => {
                                tracing::warn!(file = %path.display(), error = %e, "skipping sample record");
                            }
                        }
                    }
                }
                Ok(value) => match canonical_bytes(&value, &no_volatile) {
                    Ok(bytes) => records.push(bytes),
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "skipping sample record");
                    }
                },
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unparsable sample file");
                }
            }
        }
    }
    Ok(records)
}
