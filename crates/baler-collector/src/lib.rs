//! # baler-collector: the central side of the pipeline
//!
//! Accepts TCP connections from edge agents and inverts the pipeline:
//!
//! ```text
//! wire ─> Deframer ─> header validation ─> dictionary lookup
//!                                              │
//!                              decompress to exactly raw_len bytes
//!                                              │
//!                               split on 0x0A ─> out/<topic>.jsonl
//! ```
//!
//! One acceptor thread plus one blocking worker per connection. A frame
//! referencing a non-resident dictionary is rejected (`UnknownDict`) but
//! the connection stays up; a frame whose payload contradicts its header
//! (`CorruptFrame`) closes the connection. Appends are serialized per
//! topic and flushed to the OS per batch.

mod appender;
mod error;
mod server;

pub use appender::LogAppender;
pub use error::{CollectorError, CollectorResult};
pub use server::{Collector, CollectorConfig, ShutdownHandle};
