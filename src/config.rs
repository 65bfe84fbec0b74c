use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cls_types::SaverConfig;
use serde::Deserialize;

const CONFIG_DIR: &str = "console-log-saver";
const CONFIG_FILE: &str = "config.toml";

/// Settings read from `config.toml`; every key is optional
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub saver: SaverConfig,
    pub discovery_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            saver: SaverConfig::default(),
            discovery_timeout_ms: 1000,
            connect_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// `<config dir>/console-log-saver/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load the config file. An explicit path must exist; the default
    /// location falls back to built-in defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) => match Self::from_file(&path) {
                    Err(e) if is_not_found(&e) => {
                        tracing::debug!(path = %path.display(), "No config file, using defaults");
                        Ok(Self::default())
                    }
                    other => other,
                },
                None => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}
