//! # baler-agent: the edge side of the pipeline
//!
//! The agent ingests structured messages on many logical topics, normalizes
//! them to canonical bytes, buffers them into size/time-bounded batches,
//! compresses each batch against the topic's current dictionary, frames the
//! result, and ships it to the collector over TCP.
//!
//! ```text
//! caller ─> Validator ─> Normalizer ─> TopicBatcher ─┬─(flush)─> BatchCompressor
//!                                                    │                 │
//!                                        ticker (batch_ms / 4)         ▼
//!                                                              Frame ─> Shipper ─> wire
//! ```
//!
//! Threads: producers call [`Agent::submit`] concurrently (per-topic locks,
//! no cross-topic contention), one ticker enforces the batch-age bound, and
//! one shipper worker owns the outbound connection behind a circuit
//! breaker. Compression is CPU-bound and runs on whichever thread triggered
//! the flush — never under the topic lock.
//!
//! Recoverable failures (bad messages, compression errors, network errors)
//! are absorbed and surfaced through [`baler_types::PipelineMetrics`]; they
//! never stall the pipeline.

mod agent;
mod batcher;
mod breaker;
mod compressor;
mod error;
mod normalizer;
mod shipper;

pub use agent::{Agent, AgentConfig};
pub use batcher::{Batch, BatcherConfig, TopicBatcher};
pub use breaker::{BreakerConfig, BreakerState, BreakerTransition, CircuitBreaker};
pub use compressor::BatchCompressor;
pub use error::{AgentError, AgentResult};
pub use normalizer::Normalizer;
pub use shipper::{Connector, PendingQueue, Shipper, ShipperConfig, TcpConnector};
