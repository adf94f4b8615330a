//! CLI subcommands.

pub mod collect;
pub mod config;
pub mod train;

use anyhow::{Context, Result};
use baler_config::{BalerConfig, ConfigLoader};

/// Loads and validates the effective configuration for a project dir.
pub fn load_config(project_dir: &str) -> Result<BalerConfig> {
    ConfigLoader::new()
        .with_project_dir(project_dir)
        .load()
        .context("failed to load configuration")
}
