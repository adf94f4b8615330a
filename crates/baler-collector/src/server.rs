//! Collector TCP server: accept loop and per-connection frame workers.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use zstd::dict::DecoderDictionary;

use baler_dict::{DecoderDictCache, DictionaryStore};
use baler_types::{DictId, Limits, PipelineMetrics, RECORD_SEPARATOR};
use baler_wire::{Frame, WireError};

use crate::appender::LogAppender;
use crate::error::{CollectorError, CollectorResult};

/// Accept-loop poll interval while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Collector parameters.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub bind_addr: SocketAddr,
    pub out_dir: std::path::PathBuf,
    pub limits: Limits,
}

/// Requests a cooperative stop of the accept loop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Shared {
    dicts: Arc<DictionaryStore>,
    appender: LogAppender,
    metrics: Arc<PipelineMetrics>,
    limits: Limits,
    decoders: DecoderDictCache,
}

/// The collector server.
pub struct Collector {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
}

impl Collector {
    /// Binds the listener and opens the output directory.
    ///
    /// Both failures here are startup I/O errors — the caller maps them to
    /// exit code 3.
    pub fn bind(
        config: CollectorConfig,
        dicts: Arc<DictionaryStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> CollectorResult<Self> {
        let listener =
            TcpListener::bind(config.bind_addr).map_err(|source| CollectorError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let appender = LogAppender::open(&config.out_dir)?;

        tracing::info!(
            addr = %local_addr,
            out_dir = %config.out_dir.display(),
            "collector listening"
        );

        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                dicts,
                appender,
                metrics,
                limits: config.limits,
                decoders: DecoderDictCache::default(),
            }),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.stop))
    }

    /// Runs the accept loop until the shutdown handle fires.
    ///
    /// Each accepted connection gets its own blocking worker thread; a
    /// worker ends when its peer disconnects or a fatal frame error closes
    /// the connection.
    pub fn run(self) -> CollectorResult<()> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!("collector accept loop stopping");
                return Ok(());
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    stream.set_nonblocking(false)?;
                    let shared = Arc::clone(&self.shared);
                    thread::Builder::new()
                        .name(format!("baler-conn-{peer}"))
                        .spawn(move || handle_connection(&shared, stream, peer))
                        .map_err(CollectorError::Io)?;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    return Err(CollectorError::Io(e));
                }
            }
        }
    }
}

/// Per-connection frame loop.
fn handle_connection(shared: &Shared, mut stream: TcpStream, peer: SocketAddr) {
    loop {
        match Frame::read_from(&mut stream, &shared.limits) {
            Ok(frame) => {
                shared.metrics.record_frame_in();
                match process_frame(shared, &frame) {
                    Ok(count) => {
                        shared.metrics.record_records_out(count);
                    }
                    Err(CollectorError::UnknownDict { topic, dict_id }) => {
                        // Framing stayed valid, so the connection survives.
                        shared.metrics.record_unknown_dict();
                        tracing::warn!(%peer, topic, %dict_id, "rejected frame: unknown dictionary");
                    }
                    Err(CollectorError::CorruptFrame { topic, reason }) => {
                        shared.metrics.record_corrupt_frame();
                        tracing::warn!(%peer, topic, reason, "rejected corrupt frame, closing connection");
                        return;
                    }
                    Err(e) => {
                        tracing::error!(%peer, error = %e, "failed to process frame, closing connection");
                        return;
                    }
                }
            }
            Err(WireError::Eof) => {
                tracing::debug!(%peer, "connection closed by peer");
                return;
            }
            Err(e) => {
                shared.metrics.record_protocol_error();
                tracing::warn!(%peer, error = %e, "protocol error, closing connection");
                return;
            }
        }
    }
}

/// Decompresses and appends one frame's records.
///
/// The header was already validated by the deframer; this enforces the
/// cross-process invariants: the payload must decompress to exactly
/// `raw_len` bytes and split into exactly `count` records.
fn process_frame(shared: &Shared, frame: &Frame) -> CollectorResult<u64> {
    let header = &frame.header;
    let topic = header.topic.as_str();
    let dict_id = DictId::new(header.dict_id as u32);
    let raw_len = header.raw_len as usize;

    let raw = if dict_id.is_none() {
        zstd::bulk::Decompressor::new()
            .and_then(|mut d| d.decompress(&frame.payload, raw_len))
    } else {
        let dictionary = shared
            .dicts
            .get_by_id(topic, dict_id)
            .or_else(|| shared.dicts.sideload(topic, dict_id))
            .ok_or_else(|| CollectorError::UnknownDict {
                topic: topic.to_owned(),
                dict_id,
            })?;
        let digest = shared
            .decoders
            .get_or_digest(topic, dict_id, || DecoderDictionary::copy(&dictionary));
        zstd::bulk::Decompressor::with_prepared_dictionary(&digest)
            .and_then(|mut d| d.decompress(&frame.payload, raw_len))
    }
    .map_err(|e| CollectorError::CorruptFrame {
        topic: topic.to_owned(),
        reason: e.to_string(),
    })?;

    if raw.len() != raw_len {
        return Err(CollectorError::CorruptFrame {
            topic: topic.to_owned(),
            reason: format!("decompressed to {} bytes, header says {raw_len}", raw.len()),
        });
    }

    let records: Vec<&[u8]> = raw.split(|b| *b == RECORD_SEPARATOR).collect();
    if records.len() as u64 != header.count {
        return Err(CollectorError::CorruptFrame {
            topic: topic.to_owned(),
            reason: format!("{} records, header says {}", records.len(), header.count),
        });
    }

    shared.appender.append_batch(topic, &records)?;
    tracing::debug!(
        topic,
        count = header.count,
        raw_len,
        comp_len = header.comp_len,
        "batch appended"
    );
    Ok(header.count)
}
