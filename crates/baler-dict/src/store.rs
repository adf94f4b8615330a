//! Dictionary store: `topic -> (dict_id, bytes)` with on-disk persistence.
//!
//! # File Layout
//!
//! ```text
//! {dict_dir}/
//! ├── app.events.dict   <- raw dictionary bytes (current version)
//! ├── app.events.meta   <- {"dict_id":3,"created_at":"...","size":4096}
//! ├── sensors.dict
//! └── sensors.meta
//! ```
//!
//! The store is read-mostly: `get`/`get_by_id` take the read lock,
//! `install`/`reload`/`sideload` take the write lock. For each topic at
//! least the current and previous versions stay resident so in-flight
//! frames keep decoding across a swap.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use baler_types::{DictId, validate_topic};

use crate::error::{DictError, DictResult};

/// Versions kept resident per topic (current + previous).
const RESIDENT_VERSIONS: usize = 2;

/// Sidecar metadata stored next to each dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictMeta {
    pub dict_id: DictId,
    pub created_at: DateTime<Utc>,
    pub size: usize,
}

#[derive(Debug, Default)]
struct TopicEntry {
    /// Resident versions, ascending by id; the last one is current.
    versions: Vec<(DictId, Arc<Vec<u8>>)>,
}

impl TopicEntry {
    fn current(&self) -> Option<(DictId, Arc<Vec<u8>>)> {
        self.versions.last().map(|(id, b)| (*id, Arc::clone(b)))
    }

    fn by_id(&self, dict_id: DictId) -> Option<Arc<Vec<u8>>> {
        self.versions
            .iter()
            .find(|(id, _)| *id == dict_id)
            .map(|(_, b)| Arc::clone(b))
    }

    fn push(&mut self, dict_id: DictId, bytes: Arc<Vec<u8>>) {
        self.versions.retain(|(id, _)| *id != dict_id);
        self.versions.push((dict_id, bytes));
        self.versions.sort_by_key(|(id, _)| *id);
        while self.versions.len() > RESIDENT_VERSIONS {
            self.versions.remove(0);
        }
    }
}

/// In-memory dictionary store backed by `<dict_dir>/<topic>.dict` files.
#[derive(Debug)]
pub struct DictionaryStore {
    dict_dir: PathBuf,
    inner: RwLock<HashMap<String, TopicEntry>>,
}

impl DictionaryStore {
    /// Opens a store rooted at `dict_dir`, creating the directory if needed
    /// and loading every `<topic>.dict` + `.meta` pair found there.
    pub fn open(dict_dir: impl AsRef<Path>) -> DictResult<Self> {
        let dict_dir = dict_dir.as_ref().to_path_buf();
        fs::create_dir_all(&dict_dir)?;
        let store = Self {
            dict_dir,
            inner: RwLock::new(HashMap::new()),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-scans `dict_dir`, replacing the resident set with what is on disk.
    pub fn reload(&self) -> DictResult<()> {
        let mut loaded: HashMap<String, TopicEntry> = HashMap::new();
        for entry in fs::read_dir(&self.dict_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dict") {
                continue;
            }
            let Some(topic) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_topic(topic).is_err() {
                tracing::warn!(file = %path.display(), "skipping dictionary with invalid topic name");
                continue;
            }
            match self.read_pair(topic) {
                Ok((meta, bytes)) => {
                    loaded
                        .entry(topic.to_owned())
                        .or_default()
                        .push(meta.dict_id, Arc::new(bytes));
                    tracing::debug!(topic, dict_id = %meta.dict_id, size = meta.size, "loaded dictionary");
                }
                Err(e) => {
                    tracing::warn!(topic, error = %e, "skipping unreadable dictionary");
                }
            }
        }
        let count = loaded.len();
        *self.inner.write().expect("dict store lock poisoned") = loaded;
        tracing::info!(dict_dir = %self.dict_dir.display(), topics = count, "dictionary store loaded");
        Ok(())
    }

    /// Returns the current `(dict_id, bytes)` for a topic.
    ///
    /// A topic with no installed dictionary reports `DictId::NONE` with
    /// empty bytes — the caller compresses against an empty dictionary.
    pub fn get(&self, topic: &str) -> (DictId, Arc<Vec<u8>>) {
        self.inner
            .read()
            .expect("dict store lock poisoned")
            .get(topic)
            .and_then(TopicEntry::current)
            .unwrap_or_else(|| (DictId::NONE, Arc::new(Vec::new())))
    }

    /// Returns a specific resident version, or `None`.
    pub fn get_by_id(&self, topic: &str, dict_id: DictId) -> Option<Arc<Vec<u8>>> {
        self.inner
            .read()
            .expect("dict store lock poisoned")
            .get(topic)
            .and_then(|e| e.by_id(dict_id))
    }

    /// Installs a new dictionary for `topic`, assigning the next id and
    /// persisting `<topic>.dict` + `<topic>.meta`.
    pub fn install(&self, topic: &str, bytes: Vec<u8>) -> DictResult<DictId> {
        validate_topic(topic)?;
        let mut inner = self.inner.write().expect("dict store lock poisoned");
        let entry = inner.entry(topic.to_owned()).or_default();
        let next = entry
            .versions
            .last()
            .map_or(DictId::NONE, |(id, _)| *id)
            .next();

        let meta = DictMeta {
            dict_id: next,
            created_at: Utc::now(),
            size: bytes.len(),
        };
        write_pair(&self.dict_dir, topic, &meta, &bytes)?;
        entry.push(next, Arc::new(bytes));
        tracing::info!(topic, dict_id = %next, size = meta.size, "installed dictionary");
        Ok(next)
    }

    /// Attempts to load exactly `(topic, dict_id)` from the sidecar files.
    ///
    /// This is the collector's fallback before rejecting a frame with an
    /// unknown dictionary: the trainer may have published a version this
    /// process has not observed. The on-disk meta must carry the requested
    /// id — any other version on disk does not satisfy the frame.
    pub fn sideload(&self, topic: &str, dict_id: DictId) -> Option<Arc<Vec<u8>>> {
        validate_topic(topic).ok()?;
        let (meta, bytes) = self.read_pair(topic).ok()?;
        if meta.dict_id != dict_id {
            return None;
        }
        let bytes = Arc::new(bytes);
        self.inner
            .write()
            .expect("dict store lock poisoned")
            .entry(topic.to_owned())
            .or_default()
            .push(dict_id, Arc::clone(&bytes));
        tracing::info!(topic, dict_id = %dict_id, "sideloaded dictionary");
        Some(bytes)
    }

    /// Topics with at least one resident dictionary.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .inner
            .read()
            .expect("dict store lock poisoned")
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    fn read_pair(&self, topic: &str) -> DictResult<(DictMeta, Vec<u8>)> {
        let dict_path = self.dict_dir.join(format!("{topic}.dict"));
        let meta_path = self.dict_dir.join(format!("{topic}.meta"));
        let bytes = fs::read(&dict_path)?;
        let meta_json = fs::read_to_string(&meta_path)?;
        let meta: DictMeta = serde_json::from_str(&meta_json).map_err(|e| DictError::BadMeta {
            path: meta_path.clone(),
            reason: e.to_string(),
        })?;
        if meta.dict_id.is_none() {
            return Err(DictError::BadMeta {
                path: meta_path,
                reason: "dict_id 0 is reserved".to_owned(),
            });
        }
        if meta.size != bytes.len() {
            return Err(DictError::BadMeta {
                path: meta_path,
                reason: format!("size {} does not match file ({} bytes)", meta.size, bytes.len()),
            });
        }
        Ok((meta, bytes))
    }
}

/// Persists a dictionary and its metadata.
pub(crate) fn write_pair(
    dict_dir: &Path,
    topic: &str,
    meta: &DictMeta,
    bytes: &[u8],
) -> DictResult<()> {
    fs::create_dir_all(dict_dir)?;
    fs::write(dict_dir.join(format!("{topic}.dict")), bytes)?;
    let json = serde_json::to_string_pretty(meta).map_err(std::io::Error::other)?;
    fs::write(dict_dir.join(format!("{topic}.meta")), json)?;
    Ok(())
}

/// Reads the on-disk metadata for a topic, if present.
pub(crate) fn read_meta(dict_dir: &Path, topic: &str) -> Option<DictMeta> {
    let meta_path = dict_dir.join(format!("{topic}.meta"));
    let json = fs::read_to_string(meta_path).ok()?;
    serde_json::from_str(&json).ok()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn empty_store_reports_no_dictionary() {
        let dir = tempdir().unwrap();
        let store = DictionaryStore::open(dir.path()).unwrap();
        let (id, bytes) = store.get("anything");
        assert_eq!(id, DictId::NONE);
        assert!(bytes.is_empty());
    }

    #[test]
    fn install_assigns_monotonic_ids() {
        let dir = tempdir().unwrap();
        let store = DictionaryStore::open(dir.path()).unwrap();
        assert_eq!(store.install("t", vec![1, 2, 3]).unwrap(), DictId::new(1));
        assert_eq!(store.install("t", vec![4, 5, 6]).unwrap(), DictId::new(2));

        let (id, bytes) = store.get("t");
        assert_eq!(id, DictId::new(2));
        assert_eq!(*bytes, vec![4, 5, 6]);
    }

    #[test]
    fn previous_version_stays_resident() {
        let dir = tempdir().unwrap();
        let store = DictionaryStore::open(dir.path()).unwrap();
        store.install("t", vec![1]).unwrap();
        store.install("t", vec![2]).unwrap();
        store.install("t", vec![3]).unwrap();

        // current + previous resident, older evicted
        assert!(store.get_by_id("t", DictId::new(3)).is_some());
        assert!(store.get_by_id("t", DictId::new(2)).is_some());
        assert!(store.get_by_id("t", DictId::new(1)).is_none());
    }

    #[test]
    fn persists_across_open() {
        let dir = tempdir().unwrap();
        {
            let store = DictionaryStore::open(dir.path()).unwrap();
            store.install("events", vec![9; 64]).unwrap();
        }
        let store = DictionaryStore::open(dir.path()).unwrap();
        let (id, bytes) = store.get("events");
        assert_eq!(id, DictId::new(1));
        assert_eq!(bytes.len(), 64);
    }

    #[test]
    fn install_rejects_invalid_topic() {
        let dir = tempdir().unwrap();
        let store = DictionaryStore::open(dir.path()).unwrap();
        assert!(store.install("../escape", vec![1]).is_err());
    }

    #[test]
    fn sideload_requires_matching_id() {
        let dir = tempdir().unwrap();
        let publisher = DictionaryStore::open(dir.path()).unwrap();
        publisher.install("t", vec![7; 16]).unwrap();

        let store = DictionaryStore::open(dir.path()).unwrap();
        assert!(store.sideload("t", DictId::new(2)).is_none());
        let bytes = store.sideload("t", DictId::new(1)).unwrap();
        assert_eq!(bytes.len(), 16);
        // Now resident.
        assert!(store.get_by_id("t", DictId::new(1)).is_some());
    }

    #[test]
    fn reload_picks_up_new_files() {
        let dir = tempdir().unwrap();
        let store = DictionaryStore::open(dir.path()).unwrap();
        assert!(store.topics().is_empty());

        let publisher = DictionaryStore::open(dir.path()).unwrap();
        publisher.install("late", vec![1, 2]).unwrap();

        store.reload().unwrap();
        assert_eq!(store.topics(), ["late"]);
    }

    #[test]
    fn corrupt_meta_is_skipped_on_load() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.dict"), b"dict").unwrap();
        fs::write(dir.path().join("bad.meta"), b"not json").unwrap();
        let store = DictionaryStore::open(dir.path()).unwrap();
        assert_eq!(store.get("bad").0, DictId::NONE);
    }
}
