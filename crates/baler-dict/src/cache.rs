//! LRU caches for digested dictionary forms.
//!
//! Digesting a dictionary (parsing its entropy tables into the form the
//! compressor consumes) is much more expensive than one batch compression,
//! so both sides cache the digested form per `(topic, dict_id)`. The cache
//! is tiny — dictionary churn is an operational event, not a hot path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use zstd::dict::{DecoderDictionary, EncoderDictionary};

use baler_types::DictId;

/// Default cache capacity per process.
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

type CacheKey = (String, DictId);

/// Bounded LRU cache keyed by `(topic, dict_id)`.
///
/// Values are immutable once digested (`dict_id` never changes meaning),
/// so eviction is purely a memory bound.
pub struct DictCache<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> std::fmt::Debug for DictCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

struct Inner<T> {
    map: HashMap<CacheKey, Arc<T>>,
    order: VecDeque<CacheKey>,
}

impl<T> DictCache<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Returns the cached digest for `(topic, dict_id)`, invoking `digest`
    /// on a miss and evicting the least recently used entry when full.
    pub fn get_or_digest(
        &self,
        topic: &str,
        dict_id: DictId,
        digest: impl FnOnce() -> T,
    ) -> Arc<T> {
        let mut inner = self.inner.lock().expect("dict cache lock poisoned");
        let key = (topic.to_owned(), dict_id);

        if let Some(found) = inner.map.get(&key).map(Arc::clone) {
            inner.order.retain(|k| *k != key);
            inner.order.push_back(key);
            return found;
        }

        let value = Arc::new(digest());
        if inner.map.len() == self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
        inner.map.insert(key.clone(), Arc::clone(&value));
        inner.order.push_back(key);
        value
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("dict cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DictCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Cache of compression-side digests.
pub type EncoderDictCache = DictCache<EncoderDictionary<'static>>;

/// Cache of decompression-side digests.
pub type DecoderDictCache = DictCache<DecoderDictionary<'static>>;
