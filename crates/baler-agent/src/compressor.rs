//! Batch compression against digested per-topic dictionaries.

use zstd::dict::EncoderDictionary;

use baler_dict::EncoderDictCache;
use baler_types::DictId;

use crate::error::{AgentError, AgentResult};

/// Compresses joined batches with a cached, digested dictionary per
/// `(topic, dict_id)`.
///
/// The digest step (`EncoderDictionary::copy`) is paid once per dictionary
/// version; each batch then only constructs a cheap bulk compressor around
/// the cached digest.
#[derive(Debug)]
pub struct BatchCompressor {
    level: i32,
    cache: EncoderDictCache,
}

impl BatchCompressor {
    pub fn new(level: i32) -> Self {
        Self {
            level,
            cache: EncoderDictCache::default(),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Compresses `batch_bytes`. `dict_id == 0` (or empty dictionary
    /// bytes) compresses against an empty dictionary.
    pub fn compress(
        &self,
        topic: &str,
        dict_id: DictId,
        dictionary: &[u8],
        batch_bytes: &[u8],
    ) -> AgentResult<Vec<u8>> {
        let result = if dict_id.is_none() || dictionary.is_empty() {
            zstd::bulk::Compressor::new(self.level).and_then(|mut c| c.compress(batch_bytes))
        } else {
            let digest = self.cache.get_or_digest(topic, dict_id, || {
                EncoderDictionary::copy(dictionary, self.level)
            });
            zstd::bulk::Compressor::with_prepared_dictionary(&digest)
                .and_then(|mut c| c.compress(batch_bytes))
        };
        result.map_err(|e| AgentError::Compression(e.to_string()))
    }
}
