//! # baler-config: configuration for the baler pipeline
//!
//! One flat key set shared by the agent, collector, and trainer. Keys map
//! 1:1 onto `BALER_*` environment variables, and merge in precedence order:
//! built-in defaults, user config (`~/.config/baler/config.toml`), project
//! config (`baler.toml`), local overrides (`baler.local.toml`), then the
//! environment.

use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::{Deserialize, Serialize};

use baler_types::Limits;

mod loader;
mod paths;

pub use loader::ConfigLoader;
pub use paths::Paths;

/// The enumerated configuration keys and their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalerConfig {
    /// Shipper destination host.
    pub collector_host: String,
    /// Shipper destination / collector bind port.
    pub collector_port: u16,
    /// Maximum records per batch.
    pub batch_max: u64,
    /// Maximum batch age in milliseconds.
    pub batch_ms: u64,
    /// Batch byte ceiling (flush-before-insert threshold).
    pub batch_bytes: usize,
    /// Compressor level.
    pub compression_level: i32,
    /// Dictionary store root.
    pub dict_dir: PathBuf,
    /// Collector output root.
    pub out_dir: PathBuf,
    /// Validator: single-message ceiling.
    pub max_message_bytes: usize,
    /// Validator: batch ceiling.
    pub max_batch_bytes: usize,
    /// Circuit breaker: consecutive failures before OPEN.
    pub breaker_failures: u32,
    /// Circuit breaker: OPEN window in milliseconds.
    pub breaker_open_ms: u64,
    /// Circuit breaker: probe successes before CLOSED.
    pub breaker_successes: u32,
    /// Shipper drain window at shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for BalerConfig {
    fn default() -> Self {
        Self {
            collector_host: "127.0.0.1".to_owned(),
            collector_port: 7000,
            batch_max: 100,
            batch_ms: 250,
            batch_bytes: 1024 * 1024,
            compression_level: 7,
            dict_dir: PathBuf::from("./dicts"),
            out_dir: PathBuf::from("./out"),
            max_message_bytes: 10 * 1024 * 1024,
            max_batch_bytes: 100 * 1024 * 1024,
            breaker_failures: 5,
            breaker_open_ms: 30_000,
            breaker_successes: 2,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl BalerConfig {
    /// Validator limits derived from this configuration.
    pub fn limits(&self) -> Limits {
        Limits::new(self.max_message_bytes, self.max_batch_bytes)
    }

    /// Rejects configurations no component could run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=22).contains(&self.compression_level) {
            bail!(
                "compression_level must be in 1..=22, got {}",
                self.compression_level
            );
        }
        if self.batch_max == 0 {
            bail!("batch_max must be >= 1");
        }
        if self.batch_ms == 0 {
            bail!("batch_ms must be >= 1");
        }
        if self.batch_bytes == 0 {
            bail!("batch_bytes must be >= 1");
        }
        if self.batch_bytes > self.max_batch_bytes {
            bail!(
                "batch_bytes ({}) exceeds max_batch_bytes ({})",
                self.batch_bytes,
                self.max_batch_bytes
            );
        }
        if self.breaker_failures == 0 || self.breaker_successes == 0 {
            bail!("breaker thresholds must be >= 1");
        }
        Ok(())
    }

    /// Resolves relative paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.dict_dir.is_relative() {
            self.dict_dir = base.join(&self.dict_dir);
        }
        if self.out_dir.is_relative() {
            self.out_dir = base.join(&self.out_dir);
        }
    }
}
