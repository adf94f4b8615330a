//! Per-topic batching with dual flush triggers (size or age).
//!
//! Each topic owns an append buffer guarded by its own lock, so submissions
//! to distinct topics never contend. A flush only swaps the buffer out
//! under the lock; compression always happens outside it, on the thread
//! that triggered the flush. The batcher therefore returns ready [`Batch`]es
//! to its caller instead of invoking the compressor itself.
//!
//! Flush triggers, in order:
//! 1. **flush-before-insert** — adding a record would push the joined bytes
//!    past the byte ceiling, so the accumulated buffer flushes first;
//! 2. **count** — immediately after insertion the buffer hit `batch_max`;
//! 3. **size** — immediately after insertion the joined bytes reached the
//!    ceiling (a single oversize record flushes as a one-element batch);
//! 4. **age** — [`TopicBatcher::flush_aged`] (driven by a ticker at
//!    `batch_ms / 4` cadence) flushes buffers older than `batch_ms`.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use baler_types::{DictId, RECORD_SEPARATOR};

/// Batcher parameters (see the `batch_*` configuration keys).
#[derive(Debug, Clone, Copy)]
pub struct BatcherConfig {
    /// Maximum records per batch.
    pub batch_max: u64,
    /// Maximum batch age before a time-triggered flush.
    pub batch_age: Duration,
    /// Byte ceiling for the joined canonical bytes.
    pub batch_bytes: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_max: 100,
            batch_age: Duration::from_millis(250),
            batch_bytes: 1024 * 1024,
        }
    }
}

/// A flushed batch, ready for compression.
///
/// `bytes` is the canonical records joined with single `0x0A` separators
/// (no trailing separator), so `raw_len() == bytes.len()` is exactly the
/// value the frame header carries. `dict_id` was pinned when the first
/// record entered the buffer and is never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub topic: String,
    pub dict_id: DictId,
    pub bytes: Vec<u8>,
    pub count: u64,
}

impl Batch {
    pub fn raw_len(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Default)]
struct TopicBuffer {
    buf: Vec<u8>,
    count: u64,
    first_at: Option<Instant>,
    dict_id: DictId,
}

impl TopicBuffer {
    fn take(&mut self, topic: &str) -> Batch {
        let batch = Batch {
            topic: topic.to_owned(),
            dict_id: self.dict_id,
            bytes: std::mem::take(&mut self.buf),
            count: self.count,
        };
        self.count = 0;
        self.first_at = None;
        batch
    }
}

/// Per-topic bounded queue with dual flush trigger.
#[derive(Debug)]
pub struct TopicBatcher {
    config: BatcherConfig,
    topics: RwLock<HashMap<String, Mutex<TopicBuffer>>>,
}

impl TopicBatcher {
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Appends one canonical record, pinning `dict_id` on first insertion
    /// into an empty buffer.
    ///
    /// Returns the batches this submission triggered, in flush order
    /// (0, 1, or 2 — prior accumulation first, then the fresh buffer if it
    /// filled immediately).
    pub fn submit(&self, topic: &str, record: &[u8], dict_id: DictId) -> Vec<Batch> {
        // Fast path: topic already registered.
        {
            let topics = self.topics.read().expect("batcher lock poisoned");
            if let Some(buffer) = topics.get(topic) {
                return self.submit_locked(topic, buffer, record, dict_id);
            }
        }
        let mut topics = self.topics.write().expect("batcher lock poisoned");
        topics.entry(topic.to_owned()).or_default();
        drop(topics);

        let topics = self.topics.read().expect("batcher lock poisoned");
        let buffer = topics.get(topic).expect("topic registered above");
        self.submit_locked(topic, buffer, record, dict_id)
    }

    fn submit_locked(
        &self,
        topic: &str,
        buffer: &Mutex<TopicBuffer>,
        record: &[u8],
        dict_id: DictId,
    ) -> Vec<Batch> {
        let mut out = Vec::new();
        let mut buf = buffer.lock().expect("topic buffer lock poisoned");

        // Flush-before-insert: the accumulated buffer goes out untouched
        // rather than splitting or oversizing a batch.
        if buf.count > 0 && buf.buf.len() + 1 + record.len() > self.config.batch_bytes {
            out.push(buf.take(topic));
        }

        if buf.count == 0 {
            buf.first_at = Some(Instant::now());
            buf.dict_id = dict_id;
        } else {
            buf.buf.push(RECORD_SEPARATOR);
        }
        buf.buf.extend_from_slice(record);
        buf.count += 1;

        if buf.count >= self.config.batch_max || buf.buf.len() >= self.config.batch_bytes {
            out.push(buf.take(topic));
        }
        out
    }

    /// Flushes one topic's buffer if non-empty.
    pub fn flush_topic(&self, topic: &str) -> Option<Batch> {
        let topics = self.topics.read().expect("batcher lock poisoned");
        let buffer = topics.get(topic)?;
        let mut buf = buffer.lock().expect("topic buffer lock poisoned");
        (buf.count > 0).then(|| buf.take(topic))
    }

    /// Flushes every non-empty buffer whose age exceeds `batch_age`.
    pub fn flush_aged(&self) -> Vec<Batch> {
        let topics = self.topics.read().expect("batcher lock poisoned");
        let mut out = Vec::new();
        for (topic, buffer) in topics.iter() {
            let mut buf = buffer.lock().expect("topic buffer lock poisoned");
            let aged = buf
                .first_at
                .is_some_and(|t| t.elapsed() >= self.config.batch_age);
            if buf.count > 0 && aged {
                out.push(buf.take(topic));
            }
        }
        out
    }

    /// Flushes every non-empty buffer (shutdown path).
    pub fn flush_all(&self) -> Vec<Batch> {
        let topics = self.topics.read().expect("batcher lock poisoned");
        let mut out = Vec::new();
        for (topic, buffer) in topics.iter() {
            let mut buf = buffer.lock().expect("topic buffer lock poisoned");
            if buf.count > 0 {
                out.push(buf.take(topic));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batcher(max: u64, bytes: usize) -> TopicBatcher {
        TopicBatcher::new(BatcherConfig {
            batch_max: max,
            batch_age: Duration::from_millis(50),
            batch_bytes: bytes,
        })
    }

    #[test]
    fn accumulates_until_count_limit() {
        let b = batcher(100, 1024 * 1024);
        for i in 0..99 {
            assert!(b.submit("t", b"r", DictId::NONE).is_empty(), "i={i}");
        }
        let flushed = b.submit("t", b"r", DictId::NONE);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].count, 100);
        // 100 one-byte records + 99 separators
        assert_eq!(flushed[0].raw_len(), 199);
        // Buffer is empty again.
        assert!(b.flush_topic("t").is_none());
    }

    #[test]
    fn one_over_the_limit_yields_two_batches_in_order() {
        let b = batcher(100, 1024 * 1024);
        let mut batches = Vec::new();
        for i in 0..101u32 {
            let record = format!("{{\"seq\":{i}}}");
            batches.extend(b.submit("t", record.as_bytes(), DictId::NONE));
        }
        batches.extend(b.flush_topic("t"));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].count, 100);
        assert_eq!(batches[1].count, 1);
        assert!(batches[0].bytes.starts_with(b"{\"seq\":0}"));
        assert_eq!(batches[1].bytes, b"{\"seq\":100}");
    }

    #[test]
    fn flush_before_insert_on_byte_ceiling() {
        let b = batcher(1000, 32);
        assert!(b.submit("t", &[b'a'; 20], DictId::NONE).is_empty());
        // 20 + 1 + 20 > 32: the first record flushes alone, the second
        // starts a fresh buffer.
        let flushed = b.submit("t", &[b'b'; 20], DictId::NONE);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].bytes, vec![b'a'; 20]);
        let rest = b.flush_topic("t").unwrap();
        assert_eq!(rest.bytes, vec![b'b'; 20]);
    }

    #[test]
    fn oversize_record_flushes_prior_then_itself() {
        let b = batcher(1000, 32);
        assert!(b.submit("t", b"small", DictId::NONE).is_empty());
        let flushed = b.submit("t", &[b'x'; 64], DictId::NONE);
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].bytes, b"small");
        assert_eq!(flushed[1].count, 1);
        assert_eq!(flushed[1].raw_len(), 64);
    }

    #[test]
    fn raw_len_accounts_for_separators_exactly() {
        let b = batcher(3, 1024);
        b.submit("t", b"aa", DictId::NONE);
        b.submit("t", b"bbb", DictId::NONE);
        let flushed = b.submit("t", b"c", DictId::NONE);
        assert_eq!(flushed[0].raw_len(), 2 + 3 + 1 + 2);
        assert_eq!(flushed[0].bytes, b"aa\nbbb\nc");
    }

    #[test]
    fn dict_id_pinned_at_first_record() {
        let b = batcher(2, 1024);
        b.submit("t", b"first", DictId::new(3));
        // A dictionary swap between records must not rewrite the batch.
        let flushed = b.submit("t", b"second", DictId::new(4));
        assert_eq!(flushed[0].dict_id, DictId::new(3));
        // The next buffer pins the new id.
        b.submit("t", b"third", DictId::new(4));
        assert_eq!(b.flush_topic("t").unwrap().dict_id, DictId::new(4));
    }

    #[test]
    fn topics_do_not_interleave() {
        let b = batcher(2, 1024);
        b.submit("a", b"a1", DictId::NONE);
        b.submit("b", b"b1", DictId::NONE);
        let a = b.submit("a", b"a2", DictId::NONE);
        assert_eq!(a[0].topic, "a");
        assert_eq!(a[0].bytes, b"a1\na2");
        let bb = b.flush_topic("b").unwrap();
        assert_eq!(bb.bytes, b"b1");
    }

    #[test]
    fn flush_aged_only_takes_old_buffers() {
        let b = batcher(100, 1024 * 1024);
        b.submit("old", b"r", DictId::NONE);
        std::thread::sleep(Duration::from_millis(60));
        b.submit("fresh", b"r", DictId::NONE);

        let aged = b.flush_aged();
        assert_eq!(aged.len(), 1);
        assert_eq!(aged[0].topic, "old");
        // The fresh buffer is still there.
        assert!(b.flush_topic("fresh").is_some());
    }

    #[test]
    fn flush_empty_topic_is_noop() {
        let b = batcher(10, 1024);
        assert!(b.flush_topic("missing").is_none());
        b.submit("t", b"r", DictId::NONE);
        b.flush_topic("t").unwrap();
        assert!(b.flush_topic("t").is_none());
        assert!(b.flush_aged().is_empty());
    }

    #[test]
    fn flush_all_drains_every_topic() {
        let b = batcher(100, 1024);
        b.submit("a", b"1", DictId::NONE);
        b.submit("b", b"2", DictId::NONE);
        let mut topics: Vec<_> = b.flush_all().into_iter().map(|x| x.topic).collect();
        topics.sort();
        assert_eq!(topics, ["a", "b"]);
        assert!(b.flush_all().is_empty());
    }
}
