//! Configuration loader with multi-source merging.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{BalerConfig, Paths};

/// Configuration loader with builder pattern.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "BALER".to_owned(),
        }
    }

    /// Sets the project directory.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the environment variable prefix (default: "BALER").
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads configuration from all sources with proper precedence.
    pub fn load(self) -> Result<BalerConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults.
        let defaults = BalerConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/baler/config.toml).
        if let Ok(user_config_file) = Paths::user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Project config (baler.toml).
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local overrides (baler.local.toml, gitignored).
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (BALER_*). The key set is flat, so no
        // nesting separator: BALER_BATCH_MS -> batch_ms.
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix).try_parsing(true),
        );

        let merged = builder.build().context("failed to build configuration")?;
        let mut config: BalerConfig = merged
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        config.validate()?;
        config.resolve_paths(&self.project_dir);
        Ok(config)
    }

    /// Loads configuration or returns defaults on any failure.
    pub fn load_or_default(self) -> BalerConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
