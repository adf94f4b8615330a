//! Framed batch shipping with circuit breaker and bounded pending queue.
//!
//! The shipper owns the single logical outbound connection. Producers (and
//! the ticker) enqueue finished frames; one worker thread pops them and
//! writes each frame atomically to the connection. On a write error the
//! frame goes back to the *head* of the queue — whole-batch retry, order
//! preserved — and the connection is discarded.
//!
//! The pending queue is byte-bounded. On overflow the *oldest* frames are
//! dropped and counted (`shipper_dropped`): under sustained overload the
//! pipeline prefers freshness over completeness.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;

use baler_types::PipelineMetrics;
use baler_wire::Frame;

use crate::breaker::{BreakerConfig, BreakerTransition, CircuitBreaker};
use crate::error::{AgentError, AgentResult};

/// Shipper tuning.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    pub breaker: BreakerConfig,
    /// Upper byte bound for the pending queue (encoded frame bytes).
    pub queue_max_bytes: usize,
    /// Reconnect backoff floor.
    pub backoff_base: Duration,
    /// Reconnect backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            queue_max_bytes: 64 * 1024 * 1024,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

/// Provider of outbound connections.
///
/// A pool implementation may hand out warm sockets and keep healthy ones on
/// `release`; the shipper assumes nothing beyond this contract.
pub trait Connector: Send + Sync {
    /// Returns a ready connection, or an error when none can be provided.
    fn acquire(&self) -> std::io::Result<TcpStream>;

    /// Returns a connection after use. `healthy` is false when the stream
    /// observed an error and must not be reused.
    fn release(&self, conn: TcpStream, healthy: bool);
}

/// Direct dialer: every `acquire` opens a fresh TCP connection.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }
}

impl Connector for TcpConnector {
    fn acquire(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn release(&self, conn: TcpStream, _healthy: bool) {
        drop(conn);
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    frames: VecDeque<(Frame, usize)>,
    bytes: usize,
    closed: bool,
}

/// Byte-bounded FIFO of pending frames.
#[derive(Debug)]
pub struct PendingQueue {
    max_bytes: usize,
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl PendingQueue {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(QueueInner::default()),
            available: Condvar::new(),
        }
    }

    /// Enqueues a frame at the tail. Returns the number of oldest frames
    /// dropped to stay under the byte bound, or `None` if the queue is
    /// closed.
    pub fn push_back(&self, frame: Frame, encoded_len: usize) -> Option<u64> {
        let mut inner = self.inner.lock().expect("pending queue lock poisoned");
        if inner.closed {
            return None;
        }
        inner.frames.push_back((frame, encoded_len));
        inner.bytes += encoded_len;

        let mut dropped = 0;
        while inner.bytes > self.max_bytes && inner.frames.len() > 1 {
            if let Some((_, len)) = inner.frames.pop_front() {
                inner.bytes -= len;
                dropped += 1;
            }
        }
        drop(inner);
        self.available.notify_one();
        Some(dropped)
    }

    /// Requeues a frame at the head after a failed send. Never drops — the
    /// frame's bytes were already admitted once.
    pub fn push_front(&self, frame: Frame, encoded_len: usize) {
        let mut inner = self.inner.lock().expect("pending queue lock poisoned");
        inner.frames.push_front((frame, encoded_len));
        inner.bytes += encoded_len;
        drop(inner);
        self.available.notify_one();
    }

    /// Pops the head frame, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<(Frame, usize)> {
        let mut inner = self.inner.lock().expect("pending queue lock poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((frame, len)) = inner.frames.pop_front() {
                inner.bytes -= len;
                return Some((frame, len));
            }
            if inner.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(inner, remaining)
                .expect("pending queue lock poisoned");
            inner = guard;
        }
    }

    /// Marks the queue closed and wakes waiters. Pending frames remain
    /// poppable.
    pub fn close(&self) {
        self.inner.lock().expect("pending queue lock poisoned").closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending queue lock poisoned").frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        self.inner.lock().expect("pending queue lock poisoned").bytes
    }
}

/// Shipper worker handle.
pub struct Shipper {
    queue: Arc<PendingQueue>,
    metrics: Arc<PipelineMetrics>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Shipper {
    /// Spawns the worker thread draining `queue` into connections from
    /// `connector`.
    pub fn start(
        queue: Arc<PendingQueue>,
        connector: Arc<dyn Connector>,
        config: ShipperConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = {
            let queue = Arc::clone(&queue);
            let metrics = Arc::clone(&metrics);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("baler-shipper".to_owned())
                .spawn(move || run_worker(&queue, connector.as_ref(), &config, &metrics, &shutdown))
                .expect("failed to spawn shipper thread")
        };
        Self {
            queue,
            metrics,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Enqueues a finished frame for delivery.
    pub fn enqueue(&self, frame: Frame) -> AgentResult<()> {
        let encoded_len = frame.encoded_len()?;
        match self.queue.push_back(frame, encoded_len) {
            Some(dropped) => {
                if dropped > 0 {
                    self.metrics.record_shipper_dropped(dropped);
                    tracing::warn!(dropped, "pending queue overflow, dropped oldest frames");
                }
                Ok(())
            }
            None => Err(AgentError::Shutdown),
        }
    }

    pub fn queue(&self) -> Arc<PendingQueue> {
        Arc::clone(&self.queue)
    }

    /// Drains the queue within `grace`, then stops the worker. Frames still
    /// pending after the grace window are abandoned and counted in
    /// `shipper_dropped` by the worker on exit.
    pub fn drain(mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && !self.queue.is_empty() {
            thread::sleep(Duration::from_millis(10));
        }
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    queue: &PendingQueue,
    connector: &dyn Connector,
    config: &ShipperConfig,
    metrics: &PipelineMetrics,
    shutdown: &AtomicBool,
) {
    let mut breaker = CircuitBreaker::new(config.breaker);
    let mut conn: Option<TcpStream> = None;
    let mut backoff = config.backoff_base;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        // Gate on the breaker before touching the queue so OPEN periods
        // perform no I/O and leave frame order untouched.
        let (allowed, transition) = breaker.allow();
        record_transition(metrics, transition);
        if !allowed {
            let nap = breaker
                .time_until_probe()
                .unwrap_or(Duration::from_millis(100))
                .clamp(Duration::from_millis(10), Duration::from_millis(250));
            thread::sleep(nap);
            continue;
        }

        let Some((frame, encoded_len)) = queue.pop(Duration::from_millis(100)) else {
            continue;
        };

        if conn.is_none() {
            match connector.acquire() {
                Ok(stream) => conn = Some(stream),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to acquire collector connection");
                    metrics.topic(&frame.header.topic).record_network_error();
                    record_transition(metrics, breaker.record_failure());
                    queue.push_front(frame, encoded_len);
                    backoff = sleep_backoff(backoff, config, shutdown);
                    continue;
                }
            }
        }

        let mut stream = conn.take().expect("connection acquired above");
        match frame.write_to(&mut stream) {
            Ok(()) => {
                tracing::debug!(
                    topic = %frame.header.topic,
                    count = frame.header.count,
                    comp_len = frame.header.comp_len,
                    "frame shipped"
                );
                conn = Some(stream);
                record_transition(metrics, breaker.record_success());
                backoff = config.backoff_base;
            }
            Err(e) => {
                tracing::warn!(
                    topic = %frame.header.topic,
                    error = %e,
                    "send failed, requeueing frame at head"
                );
                metrics.topic(&frame.header.topic).record_network_error();
                record_transition(metrics, breaker.record_failure());
                connector.release(stream, false);
                queue.push_front(frame, encoded_len);
                backoff = sleep_backoff(backoff, config, shutdown);
            }
        }
    }

    if let Some(stream) = conn {
        connector.release(stream, true);
    }
    let leftover = queue.len() as u64;
    if leftover > 0 {
        metrics.record_shipper_dropped(leftover);
        tracing::warn!(leftover, "abandoning undelivered frames at shutdown");
    }
}

fn record_transition(metrics: &PipelineMetrics, transition: Option<BreakerTransition>) {
    match transition {
        Some(BreakerTransition::Opened) => {
            tracing::warn!("circuit breaker opened");
            metrics.record_breaker_opened();
        }
        Some(BreakerTransition::HalfOpened) => {
            tracing::info!("circuit breaker half-open, probing");
            metrics.record_breaker_half_opened();
        }
        Some(BreakerTransition::Closed) => {
            tracing::info!("circuit breaker closed");
            metrics.record_breaker_closed();
        }
        None => {}
    }
}

/// Sleeps the jittered backoff (in short slices so shutdown stays
/// responsive) and returns the next backoff value.
fn sleep_backoff(backoff: Duration, config: &ShipperConfig, shutdown: &AtomicBool) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    let mut remaining = backoff.mul_f64(jitter);
    while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
        let slice = remaining.min(Duration::from_millis(50));
        thread::sleep(slice);
        remaining -= slice;
    }
    (backoff * 2).min(config.backoff_cap)
}
