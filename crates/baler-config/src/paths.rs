//! Configuration file locations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Well-known configuration paths.
pub struct Paths;

impl Paths {
    /// User config file: `~/.config/baler/config.toml` (platform XDG rules).
    pub fn user_config_file() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "baler")
            .context("could not determine user config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Project config file: `<project_dir>/baler.toml`.
    pub fn project_config_file(project_dir: &Path) -> PathBuf {
        project_dir.join("baler.toml")
    }

    /// Local override file: `<project_dir>/baler.local.toml` (gitignored).
    pub fn local_config_file(project_dir: &Path) -> PathBuf {
        project_dir.join("baler.local.toml")
    }
}
