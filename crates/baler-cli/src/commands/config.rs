//! Config command - prints the effective merged configuration.

use anyhow::{Context, Result};

use super::load_config;

pub fn run(project_dir: &str) -> Result<()> {
    let config = load_config(project_dir)?;
    let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
