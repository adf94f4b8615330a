//! End-to-end pipeline tests: agent -> wire -> collector -> per-topic logs.

use std::fs;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::tempdir;

use baler_agent::{
    Agent, AgentConfig, BatcherConfig, BreakerConfig, Normalizer, ShipperConfig, TcpConnector,
};
use baler_collector::{Collector, CollectorConfig, ShutdownHandle};
use baler_dict::DictionaryStore;
use baler_types::{Limits, PipelineMetrics};
use baler_wire::{Frame, FrameHeader, PROTOCOL_VERSION};

struct CollectorUnderTest {
    addr: SocketAddr,
    handle: ShutdownHandle,
    metrics: Arc<PipelineMetrics>,
    join: JoinHandle<()>,
}

impl CollectorUnderTest {
    fn start(dict_dir: &Path, out_dir: &Path) -> Self {
        let dicts = Arc::new(DictionaryStore::open(dict_dir).unwrap());
        let metrics = Arc::new(PipelineMetrics::new());
        let collector = Collector::bind(
            CollectorConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                out_dir: out_dir.to_path_buf(),
                limits: Limits::default(),
            },
            dicts,
            Arc::clone(&metrics),
        )
        .unwrap();
        let addr = collector.local_addr();
        let handle = collector.shutdown_handle();
        let join = thread::spawn(move || collector.run().unwrap());
        Self {
            addr,
            handle,
            metrics,
            join,
        }
    }

    fn stop(self) {
        self.handle.shutdown();
        self.join.join().unwrap();
    }
}

fn agent_config() -> AgentConfig {
    AgentConfig {
        batcher: BatcherConfig {
            batch_max: 100,
            batch_age: Duration::from_millis(40),
            batch_bytes: 1024 * 1024,
        },
        shipper: ShipperConfig {
            breaker: BreakerConfig::default(),
            queue_max_bytes: 16 * 1024 * 1024,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(20),
        },
        compression_level: 3,
        limits: Limits::default(),
        shutdown_grace: Duration::from_secs(5),
    }
}

fn start_agent(addr: SocketAddr, dicts: Arc<DictionaryStore>) -> Agent {
    Agent::start(
        agent_config(),
        Normalizer::new(),
        dicts,
        Arc::new(TcpConnector::new(&addr.ip().to_string(), addr.port())),
        Arc::new(PipelineMetrics::new()),
    )
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

#[test]
fn records_roundtrip_and_preserve_order() {
    let dict_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let collector = CollectorUnderTest::start(dict_dir.path(), out_dir.path());

    let agent = start_agent(
        collector.addr,
        Arc::new(DictionaryStore::open(dict_dir.path()).unwrap()),
    );
    for i in 0..250 {
        agent.submit("events", &json!({"seq": i})).unwrap();
    }
    agent.shutdown();

    let out_file = out_dir.path().join("events.jsonl");
    assert!(
        wait_until(Duration::from_secs(5), || read_lines(&out_file).len() == 250),
        "collector never observed all records"
    );
    let lines = read_lines(&out_file);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line, &format!("{{\"seq\":{i}}}"));
    }

    // 250 submits with batch_max 100: two full frames plus the remainder.
    let snap = collector.metrics.snapshot();
    assert_eq!(snap.records_out, 250);
    assert!(snap.frames_in >= 3);
    assert_eq!(snap.corrupt_frames, 0);
    assert_eq!(snap.unknown_dict, 0);

    collector.stop();
}

#[test]
fn topics_write_separate_logs() {
    let dict_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let collector = CollectorUnderTest::start(dict_dir.path(), out_dir.path());

    let agent = start_agent(
        collector.addr,
        Arc::new(DictionaryStore::open(dict_dir.path()).unwrap()),
    );
    agent.submit("alpha", &json!({"v": 1})).unwrap();
    agent.submit("beta", &json!({"v": 2})).unwrap();
    agent.shutdown();

    assert!(wait_until(Duration::from_secs(5), || {
        !read_lines(&out_dir.path().join("alpha.jsonl")).is_empty()
            && !read_lines(&out_dir.path().join("beta.jsonl")).is_empty()
    }));
    assert_eq!(read_lines(&out_dir.path().join("alpha.jsonl")), ["{\"v\":1}"]);
    assert_eq!(read_lines(&out_dir.path().join("beta.jsonl")), ["{\"v\":2}"]);

    collector.stop();
}

#[test]
fn dictionary_compressed_batches_decode() {
    let dict_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();

    // Publish a dictionary before either side starts.
    let publisher = DictionaryStore::open(dict_dir.path()).unwrap();
    publisher
        .install("metrics", br#"{"host":"edge-","level":"info","seq":"#.to_vec())
        .unwrap();

    let collector = CollectorUnderTest::start(dict_dir.path(), out_dir.path());
    let agent = start_agent(
        collector.addr,
        Arc::new(DictionaryStore::open(dict_dir.path()).unwrap()),
    );
    for i in 0..10 {
        agent
            .submit("metrics", &json!({"host": "edge-1", "level": "info", "seq": i}))
            .unwrap();
    }
    agent.shutdown();

    let out_file = out_dir.path().join("metrics.jsonl");
    assert!(wait_until(Duration::from_secs(5), || {
        read_lines(&out_file).len() == 10
    }));
    let lines = read_lines(&out_file);
    assert_eq!(lines[0], r#"{"host":"edge-1","level":"info","seq":0}"#);
    assert_eq!(lines[9], r#"{"host":"edge-1","level":"info","seq":9}"#);

    collector.stop();
}

#[test]
fn unknown_dict_rejected_then_recovers_after_publish() {
    let edge_dicts = tempdir().unwrap();
    let collector_dicts = tempdir().unwrap();
    let out_dir = tempdir().unwrap();

    // The edge has a dictionary the collector has never seen.
    let publisher = DictionaryStore::open(edge_dicts.path()).unwrap();
    publisher.install("t", b"shared-prefix".to_vec()).unwrap();

    let collector = CollectorUnderTest::start(collector_dicts.path(), out_dir.path());
    let agent = start_agent(
        collector.addr,
        Arc::new(DictionaryStore::open(edge_dicts.path()).unwrap()),
    );

    agent.submit("t", &json!({"phase": "before"})).unwrap();
    agent.flush("t");
    assert!(
        wait_until(Duration::from_secs(5), || {
            collector.metrics.snapshot().unknown_dict == 1
        }),
        "frame was not rejected"
    );
    // Nothing was written, and the edge keeps shipping on the same
    // connection.
    assert!(read_lines(&out_dir.path().join("t.jsonl")).is_empty());

    // Restore the dictionaries on the collector side; the next frame is
    // sideloaded and decodes.
    for name in ["t.dict", "t.meta"] {
        fs::copy(edge_dicts.path().join(name), collector_dicts.path().join(name)).unwrap();
    }
    agent.submit("t", &json!({"phase": "after"})).unwrap();
    agent.shutdown();

    let out_file = out_dir.path().join("t.jsonl");
    assert!(wait_until(Duration::from_secs(5), || {
        !read_lines(&out_file).is_empty()
    }));
    assert_eq!(read_lines(&out_file), ["{\"phase\":\"after\"}"]);

    collector.stop();
}

#[test]
fn corrupt_frame_closes_connection() {
    let dict_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let collector = CollectorUnderTest::start(dict_dir.path(), out_dir.path());

    // Hand-build a frame whose header lies about raw_len.
    let batch = b"{\"a\":1}";
    let payload = zstd::bulk::Compressor::new(3)
        .and_then(|mut c| c.compress(batch))
        .unwrap();
    let frame = Frame::new(
        FrameHeader {
            comp_len: payload.len() as u64,
            count: 1,
            dict_id: 0,
            level: 3,
            raw_len: (batch.len() as u64) + 5,
            topic: "t".to_owned(),
            v: PROTOCOL_VERSION,
        },
        payload.into(),
    )
    .unwrap();

    let mut stream = TcpStream::connect(collector.addr).unwrap();
    frame.write_to(&mut stream).unwrap();

    // Collector rejects and closes; the next read observes EOF.
    assert!(wait_until(Duration::from_secs(5), || {
        collector.metrics.snapshot().corrupt_frames == 1
    }));
    let mut probe = [0u8; 1];
    assert!(wait_until(Duration::from_secs(5), || {
        use std::io::Read;
        matches!(stream.read(&mut probe), Ok(0))
    }));
    assert!(read_lines(&out_dir.path().join("t.jsonl")).is_empty());

    collector.stop();
}

#[test]
fn garbage_bytes_are_a_protocol_error() {
    let dict_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let collector = CollectorUnderTest::start(dict_dir.path(), out_dir.path());

    let mut stream = TcpStream::connect(collector.addr).unwrap();
    {
        use std::io::Write;
        stream.write_all(&[0x00, 0x04, b'j', b'u', b'n', b'k']).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        collector.metrics.snapshot().protocol_errors == 1
    }));

    collector.stop();
}
