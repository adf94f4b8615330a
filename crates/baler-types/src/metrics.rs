//! Thread-safe pipeline counters with point-in-time snapshots.
//!
//! Counters are plain relaxed atomics grouped per topic; the topic map is
//! read-mostly (`RwLock<HashMap>`), so hot-path updates take the read lock
//! only. A [`MetricsSnapshot`] is a stable copy of every counter plus the
//! derived compression ratio and throughput, and can render itself as CSV
//! (`ts,topic,msgs,raw_bytes,comp_bytes,ratio,flush_ms,dict_id`).

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::DictId;

/// Counters for a single topic.
#[derive(Debug, Default)]
pub struct TopicCounters {
    messages_in: AtomicU64,
    bytes_raw_in: AtomicU64,
    bytes_comp_out: AtomicU64,
    flushes: AtomicU64,
    flush_ms_sum: AtomicU64,
    compression_errors: AtomicU64,
    network_errors: AtomicU64,
    dict_id: AtomicU32,
}

impl TopicCounters {
    /// Records one accepted message of `raw_len` canonical bytes.
    pub fn record_submit(&self, raw_len: usize) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_raw_in.fetch_add(raw_len as u64, Ordering::Relaxed);
    }

    /// Records a completed flush.
    pub fn record_flush(&self, comp_len: usize, flush_ms: u64, dict_id: DictId) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_comp_out.fetch_add(comp_len as u64, Ordering::Relaxed);
        self.flush_ms_sum.fetch_add(flush_ms, Ordering::Relaxed);
        self.dict_id.store(dict_id.as_u32(), Ordering::Relaxed);
    }

    pub fn record_compression_error(&self) {
        self.compression_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Aggregated counters for the whole pipeline.
///
/// One instance is constructed at startup and passed explicitly to every
/// component that records into it — there is no global registry.
#[derive(Debug)]
pub struct PipelineMetrics {
    topics: RwLock<HashMap<String, Arc<TopicCounters>>>,
    started: Instant,

    // Edge-side globals.
    rejected_messages: AtomicU64,
    shipper_dropped: AtomicU64,
    breaker_opened: AtomicU64,
    breaker_half_opened: AtomicU64,
    breaker_closed: AtomicU64,

    // Collector-side globals.
    frames_in: AtomicU64,
    records_out: AtomicU64,
    unknown_dict: AtomicU64,
    corrupt_frames: AtomicU64,
    protocol_errors: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            started: Instant::now(),
            rejected_messages: AtomicU64::new(0),
            shipper_dropped: AtomicU64::new(0),
            breaker_opened: AtomicU64::new(0),
            breaker_half_opened: AtomicU64::new(0),
            breaker_closed: AtomicU64::new(0),
            frames_in: AtomicU64::new(0),
            records_out: AtomicU64::new(0),
            unknown_dict: AtomicU64::new(0),
            corrupt_frames: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
        }
    }

    /// Returns the counter block for a topic, creating it on first use.
    pub fn topic(&self, name: &str) -> Arc<TopicCounters> {
        if let Some(counters) = self.topics.read().expect("metrics lock poisoned").get(name) {
            return Arc::clone(counters);
        }
        let mut topics = self.topics.write().expect("metrics lock poisoned");
        Arc::clone(
            topics
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(TopicCounters::default())),
        )
    }

    pub fn record_rejected_message(&self) {
        self.rejected_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Records frames dropped by the shipper (queue overflow or abandoned
    /// at shutdown).
    pub fn record_shipper_dropped(&self, frames: u64) {
        self.shipper_dropped.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_breaker_opened(&self) {
        self.breaker_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_half_opened(&self) {
        self.breaker_half_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_closed(&self) {
        self.breaker_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records_out(&self, count: u64) {
        self.records_out.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_unknown_dict(&self) {
        self.unknown_dict.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_frame(&self) {
        self.corrupt_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shipper_dropped(&self) -> u64 {
        self.shipper_dropped.load(Ordering::Relaxed)
    }

    /// Returns a stable view of all counters at a point in time.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let topics = self.topics.read().expect("metrics lock poisoned");

        let mut per_topic: Vec<TopicSnapshot> = topics
            .iter()
            .map(|(name, c)| {
                let raw = c.bytes_raw_in.load(Ordering::Relaxed);
                let comp = c.bytes_comp_out.load(Ordering::Relaxed);
                TopicSnapshot {
                    topic: name.clone(),
                    messages_in: c.messages_in.load(Ordering::Relaxed),
                    bytes_raw_in: raw,
                    bytes_comp_out: comp,
                    ratio: if raw == 0 { 0.0 } else { comp as f64 / raw as f64 },
                    throughput_bps: if elapsed_secs > 0.0 {
                        raw as f64 / elapsed_secs
                    } else {
                        0.0
                    },
                    flushes: c.flushes.load(Ordering::Relaxed),
                    flush_ms_sum: c.flush_ms_sum.load(Ordering::Relaxed),
                    compression_errors: c.compression_errors.load(Ordering::Relaxed),
                    network_errors: c.network_errors.load(Ordering::Relaxed),
                    dict_id: DictId::new(c.dict_id.load(Ordering::Relaxed)),
                }
            })
            .collect();
        per_topic.sort_by(|a, b| a.topic.cmp(&b.topic));

        MetricsSnapshot {
            ts: Utc::now(),
            elapsed_secs,
            topics: per_topic,
            rejected_messages: self.rejected_messages.load(Ordering::Relaxed),
            shipper_dropped: self.shipper_dropped.load(Ordering::Relaxed),
            breaker_opened: self.breaker_opened.load(Ordering::Relaxed),
            breaker_half_opened: self.breaker_half_opened.load(Ordering::Relaxed),
            breaker_closed: self.breaker_closed.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            records_out: self.records_out.load(Ordering::Relaxed),
            unknown_dict: self.unknown_dict.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-topic counter values at snapshot time, with derived figures.
#[derive(Debug, Clone)]
pub struct TopicSnapshot {
    pub topic: String,
    pub messages_in: u64,
    pub bytes_raw_in: u64,
    pub bytes_comp_out: u64,
    /// `bytes_comp_out / bytes_raw_in`; 0.0 when nothing was ingested.
    pub ratio: f64,
    /// `bytes_raw_in / elapsed` in bytes per second.
    pub throughput_bps: f64,
    pub flushes: u64,
    pub flush_ms_sum: u64,
    pub compression_errors: u64,
    pub network_errors: u64,
    pub dict_id: DictId,
}

/// Stable view of all counters at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub ts: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub topics: Vec<TopicSnapshot>,
    pub rejected_messages: u64,
    pub shipper_dropped: u64,
    pub breaker_opened: u64,
    pub breaker_half_opened: u64,
    pub breaker_closed: u64,
    pub frames_in: u64,
    pub records_out: u64,
    pub unknown_dict: u64,
    pub corrupt_frames: u64,
    pub protocol_errors: u64,
}

impl MetricsSnapshot {
    /// Renders the per-topic rows as CSV.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("ts,topic,msgs,raw_bytes,comp_bytes,ratio,flush_ms,dict_id\n");
        let ts = self.ts.to_rfc3339();
        for t in &self.topics {
            out.push_str(&format!(
                "{ts},{},{},{},{},{:.4},{},{}\n",
                t.topic,
                t.messages_in,
                t.bytes_raw_in,
                t.bytes_comp_out,
                t.ratio,
                t.flush_ms_sum,
                t.dict_id,
            ));
        }
        out
    }
}
