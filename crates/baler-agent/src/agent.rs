//! The edge agent facade.
//!
//! Wires the normalizer, batcher, compressor, dictionary store, metrics,
//! and shipper into one pipeline. All collaborators are constructed at
//! startup and passed in explicitly; the agent holds no global state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::Value;

use baler_dict::DictionaryStore;
use baler_types::{Limits, MetricsSnapshot, PipelineMetrics, validate_topic};
use baler_wire::{Frame, FrameHeader, PROTOCOL_VERSION};

use crate::batcher::{Batch, BatcherConfig, TopicBatcher};
use crate::compressor::BatchCompressor;
use crate::error::{AgentError, AgentResult};
use crate::normalizer::Normalizer;
use crate::shipper::{Connector, PendingQueue, Shipper, ShipperConfig};

/// Agent construction parameters.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub batcher: BatcherConfig,
    pub shipper: ShipperConfig,
    /// Compressor level, carried informationally in every frame header.
    pub compression_level: i32,
    pub limits: Limits,
    /// Shipper drain window at shutdown.
    pub shutdown_grace: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            batcher: BatcherConfig::default(),
            shipper: ShipperConfig::default(),
            compression_level: 7,
            limits: Limits::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

struct AgentInner {
    normalizer: Normalizer,
    batcher: TopicBatcher,
    compressor: BatchCompressor,
    dicts: Arc<DictionaryStore>,
    metrics: Arc<PipelineMetrics>,
    queue: Arc<PendingQueue>,
    limits: Limits,
}

impl AgentInner {
    /// Compresses a flushed batch, frames it, and hands it to the shipper
    /// queue. Runs on whichever thread triggered the flush.
    ///
    /// Failures here are recoverable by policy: the batch is dropped, the
    /// error counted, and the pipeline continues.
    fn seal_and_enqueue(&self, batch: Batch) {
        let started = Instant::now();
        let counters = self.metrics.topic(&batch.topic);

        let dictionary = if batch.dict_id.is_none() {
            Arc::new(Vec::new())
        } else {
            match self.dicts.get_by_id(&batch.topic, batch.dict_id) {
                Some(bytes) => bytes,
                None => {
                    // Two installs landed within one batch window; the
                    // pinned version is gone and the id must not be
                    // rewritten.
                    tracing::warn!(
                        topic = %batch.topic,
                        dict_id = %batch.dict_id,
                        "pinned dictionary no longer resident, dropping batch"
                    );
                    counters.record_compression_error();
                    return;
                }
            }
        };

        let payload = match self.compressor.compress(
            &batch.topic,
            batch.dict_id,
            &dictionary,
            &batch.bytes,
        ) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(topic = %batch.topic, error = %e, "dropping batch");
                counters.record_compression_error();
                return;
            }
        };

        let comp_len = payload.len();
        let header = FrameHeader {
            comp_len: comp_len as u64,
            count: batch.count,
            dict_id: u64::from(batch.dict_id.as_u32()),
            level: self.compressor.level(),
            raw_len: batch.raw_len() as u64,
            topic: batch.topic.clone(),
            v: PROTOCOL_VERSION,
        };
        let frame = match Frame::new(header, Bytes::from(payload)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(topic = %batch.topic, error = %e, "failed to frame batch");
                counters.record_compression_error();
                return;
            }
        };
        let encoded_len = match frame.encoded_len() {
            Ok(len) => len,
            Err(e) => {
                tracing::error!(topic = %batch.topic, error = %e, "failed to frame batch");
                counters.record_compression_error();
                return;
            }
        };

        match self.queue.push_back(frame, encoded_len) {
            Some(dropped) => {
                if dropped > 0 {
                    self.metrics.record_shipper_dropped(dropped);
                    tracing::warn!(dropped, "pending queue overflow, dropped oldest frames");
                }
            }
            None => {
                // Shutdown raced a late flush; the frame counts as dropped.
                self.metrics.record_shipper_dropped(1);
            }
        }

        let flush_ms = started.elapsed().as_millis() as u64;
        counters.record_flush(comp_len, flush_ms, batch.dict_id);
    }
}

/// The edge agent: normalize, batch, compress, ship.
pub struct Agent {
    inner: Arc<AgentInner>,
    shipper: Option<Shipper>,
    ticker: Option<JoinHandle<()>>,
    ticker_stop: mpsc::Sender<()>,
    closing: Arc<AtomicBool>,
    shutdown_grace: Duration,
}

impl Agent {
    /// Starts the agent: spawns the shipper worker and the flush ticker.
    pub fn start(
        config: AgentConfig,
        normalizer: Normalizer,
        dicts: Arc<DictionaryStore>,
        connector: Arc<dyn Connector>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let queue = Arc::new(PendingQueue::new(config.shipper.queue_max_bytes));
        let shipper = Shipper::start(
            Arc::clone(&queue),
            connector,
            config.shipper.clone(),
            Arc::clone(&metrics),
        );

        let inner = Arc::new(AgentInner {
            normalizer,
            batcher: TopicBatcher::new(config.batcher),
            compressor: BatchCompressor::new(config.compression_level),
            dicts,
            metrics,
            queue,
            limits: config.limits,
        });

        // Ticker cadence is bounded by batch_ms / 4 so a buffer reaching
        // batch_ms in age flushes within a quarter period of doing so.
        let tick = (config.batcher.batch_age / 4).max(Duration::from_millis(1));
        let (ticker_stop, stop_rx) = mpsc::channel::<()>();
        let ticker = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("baler-ticker".to_owned())
                .spawn(move || {
                    loop {
                        match stop_rx.recv_timeout(tick) {
                            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                            Err(mpsc::RecvTimeoutError::Timeout) => {
                                for batch in inner.batcher.flush_aged() {
                                    inner.seal_and_enqueue(batch);
                                }
                            }
                        }
                    }
                })
                .expect("failed to spawn ticker thread")
        };

        tracing::info!(
            batch_max = inner.batcher.config().batch_max,
            batch_ms = inner.batcher.config().batch_age.as_millis() as u64,
            batch_bytes = inner.batcher.config().batch_bytes,
            level = config.compression_level,
            "agent started"
        );

        Self {
            inner,
            shipper: Some(shipper),
            ticker: Some(ticker),
            ticker_stop,
            closing: Arc::new(AtomicBool::new(false)),
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Submits one message on `topic`.
    ///
    /// An `Err` means this message was rejected (and counted); it never
    /// indicates a pipeline failure — compression and delivery problems are
    /// absorbed downstream and surface only in metrics.
    pub fn submit(&self, topic: &str, msg: &Value) -> AgentResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(AgentError::Shutdown);
        }
        if let Err(e) = validate_topic(topic) {
            self.inner.metrics.record_rejected_message();
            return Err(e.into());
        }
        let record = match self.inner.normalizer.normalize(topic, msg) {
            Ok(record) => record,
            Err(e) => {
                self.inner.metrics.record_rejected_message();
                tracing::debug!(topic, error = %e, "message rejected");
                return Err(e.into());
            }
        };
        if let Err(e) = self.inner.limits.check_message(record.len()) {
            self.inner.metrics.record_rejected_message();
            tracing::warn!(topic, len = record.len(), "oversized message rejected");
            return Err(e.into());
        }

        self.inner.metrics.topic(topic).record_submit(record.len());
        let (dict_id, _) = self.inner.dicts.get(topic);
        for batch in self.inner.batcher.submit(topic, &record, dict_id) {
            self.inner.seal_and_enqueue(batch);
        }
        Ok(())
    }

    /// Forces a flush of one topic's buffer.
    pub fn flush(&self, topic: &str) {
        if let Some(batch) = self.inner.batcher.flush_topic(topic) {
            self.inner.seal_and_enqueue(batch);
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Cooperative shutdown: stop the ticker, flush every buffer, then let
    /// the shipper drain within the grace window. Frames still pending
    /// afterwards are abandoned and counted in `shipper_dropped`.
    pub fn shutdown(mut self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.ticker_stop.send(());
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
        for batch in self.inner.batcher.flush_all() {
            self.inner.seal_and_enqueue(batch);
        }
        if let Some(shipper) = self.shipper.take() {
            shipper.drain(self.shutdown_grace);
        }
        tracing::info!(
            dropped = self.inner.metrics.shipper_dropped(),
            "agent shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use serde_json::json;
    use tempfile::tempdir;

    use baler_types::{DictId, ValidateError};
    use baler_wire::WireError;

    use crate::breaker::BreakerConfig;
    use crate::error::AgentError;
    use crate::shipper::TcpConnector;

    use super::*;

    fn fast_config(batch_age_ms: u64) -> AgentConfig {
        AgentConfig {
            batcher: BatcherConfig {
                batch_max: 100,
                batch_age: Duration::from_millis(batch_age_ms),
                batch_bytes: 1024 * 1024,
            },
            shipper: ShipperConfig {
                breaker: BreakerConfig::default(),
                queue_max_bytes: 1024 * 1024,
                backoff_base: Duration::from_millis(1),
                backoff_cap: Duration::from_millis(10),
            },
            compression_level: 3,
            limits: Limits::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Accepts one connection and reads frames until the peer closes.
    fn frame_sink(listener: TcpListener) -> thread::JoinHandle<Vec<Frame>> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let limits = Limits::default();
            let mut frames = Vec::new();
            loop {
                match Frame::read_from(&mut stream, &limits) {
                    Ok(frame) => frames.push(frame),
                    Err(WireError::Eof) => break,
                    Err(e) => panic!("unexpected wire error: {e}"),
                }
            }
            frames
        })
    }

    fn start_agent(
        config: AgentConfig,
        dicts: Arc<DictionaryStore>,
    ) -> (Agent, thread::JoinHandle<Vec<Frame>>, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let sink = frame_sink(listener);
        let agent = Agent::start(
            config,
            Normalizer::new(),
            dicts,
            Arc::new(TcpConnector::new(&addr.ip().to_string(), addr.port())),
            Arc::new(PipelineMetrics::new()),
        );
        (agent, sink, addr)
    }

    fn decompress(frame: &Frame) -> Vec<u8> {
        let mut d = zstd::bulk::Decompressor::new().unwrap();
        d.decompress(&frame.payload, frame.header.raw_len as usize)
            .unwrap()
    }

    /// Unblocks a sink that never saw an agent connection by handing it an
    /// immediately-closed one.
    fn release_sink(addr: std::net::SocketAddr) {
        drop(std::net::TcpStream::connect(addr).unwrap());
    }

    #[test]
    fn single_message_flushes_on_age() {
        let dicts = Arc::new(DictionaryStore::open(tempdir().unwrap().path()).unwrap());
        let (agent, sink, _) = start_agent(fast_config(40), dicts);

        agent.submit("events", &json!({"b": 2, "a": 1})).unwrap();
        thread::sleep(Duration::from_millis(200));
        agent.shutdown();

        let frames = sink.join().unwrap();
        assert_eq!(frames.len(), 1);
        let header = &frames[0].header;
        assert_eq!(header.count, 1);
        assert_eq!(header.dict_id, 0);
        assert_eq!(header.raw_len, br#"{"a":1,"b":2}"#.len() as u64);
        assert_eq!(decompress(&frames[0]), br#"{"a":1,"b":2}"#);
    }

    #[test]
    fn exactly_batch_max_yields_one_full_frame() {
        let dicts = Arc::new(DictionaryStore::open(tempdir().unwrap().path()).unwrap());
        // Long age so the timer cannot fire first.
        let (agent, sink, _) = start_agent(fast_config(60_000), dicts);

        for i in 0..100 {
            agent.submit("t", &json!({"seq": i})).unwrap();
        }
        agent.shutdown();

        let frames = sink.join().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.count, 100);
    }

    #[test]
    fn one_over_batch_max_yields_two_frames_in_order() {
        let dicts = Arc::new(DictionaryStore::open(tempdir().unwrap().path()).unwrap());
        let (agent, sink, _) = start_agent(fast_config(60_000), dicts);

        for i in 0..101 {
            agent.submit("t", &json!({"seq": i})).unwrap();
        }
        agent.shutdown();

        let frames = sink.join().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.count, 100);
        assert_eq!(frames[1].header.count, 1);
        assert_eq!(decompress(&frames[1]), br#"{"seq":100}"#);
    }

    #[test]
    fn oversized_message_is_rejected_without_a_frame() {
        let dicts = Arc::new(DictionaryStore::open(tempdir().unwrap().path()).unwrap());
        let mut config = fast_config(40);
        config.limits = Limits::new(64, 1024 * 1024);
        let (agent, sink, addr) = start_agent(config, dicts);

        let big = json!({"blob": "x".repeat(256)});
        let err = agent.submit("t", &big).unwrap_err();
        assert!(matches!(
            err,
            AgentError::Invalid(ValidateError::MessageTooLarge { .. })
        ));
        let metrics = agent.metrics();
        agent.shutdown();

        release_sink(addr);
        assert!(sink.join().unwrap().is_empty());
        assert_eq!(metrics.snapshot().rejected_messages, 1);
    }

    #[test]
    fn invalid_topic_is_rejected() {
        let dicts = Arc::new(DictionaryStore::open(tempdir().unwrap().path()).unwrap());
        let (agent, sink, addr) = start_agent(fast_config(40), dicts);
        assert!(agent.submit("bad/topic", &json!({"a": 1})).is_err());
        agent.shutdown();
        release_sink(addr);
        assert!(sink.join().unwrap().is_empty());
    }

    #[test]
    fn frames_carry_installed_dict_id() {
        let dir = tempdir().unwrap();
        let dicts = Arc::new(DictionaryStore::open(dir.path()).unwrap());
        dicts
            .install("t", br#"{"seq":"#.to_vec())
            .unwrap();
        let (agent, sink, _) = start_agent(fast_config(60_000), dicts.clone());

        agent.submit("t", &json!({"seq": 1})).unwrap();
        agent.submit("t", &json!({"seq": 2})).unwrap();
        agent.shutdown();

        let frames = sink.join().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.dict_id, 1);

        // Decoding requires the same dictionary.
        let dict = dicts.get_by_id("t", DictId::new(1)).unwrap();
        let mut d = zstd::bulk::Decompressor::with_dictionary(&dict).unwrap();
        let raw = d
            .decompress(&frames[0].payload, frames[0].header.raw_len as usize)
            .unwrap();
        assert_eq!(raw, b"{\"seq\":1}\n{\"seq\":2}");
    }

    #[test]
    fn shutdown_flushes_partial_buffers() {
        let dicts = Arc::new(DictionaryStore::open(tempdir().unwrap().path()).unwrap());
        let (agent, sink, _) = start_agent(fast_config(60_000), dicts);

        agent.submit("a", &json!({"x": 1})).unwrap();
        agent.submit("b", &json!({"y": 2})).unwrap();
        agent.shutdown();

        let frames = sink.join().unwrap();
        let mut topics: Vec<_> = frames.iter().map(|f| f.header.topic.clone()).collect();
        topics.sort();
        assert_eq!(topics, ["a", "b"]);
    }
}
