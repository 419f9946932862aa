//! Configuration for dish.
//!
//! Configuration is loaded from `~/.config/dish/config.toml`. Every field has
//! a default, so a missing file or an empty one is a valid configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::distribute::{DEFAULT_BASE_PORT, DEFAULT_HOST};
use crate::paths;

/// Top-level daemon and compiler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishConfig {
    /// Partition compiled pipelines across workers.
    #[serde(default)]
    pub distributed: bool,

    /// Compile and admit, but write no scripts.
    #[serde(default)]
    pub dry_run: bool,

    /// Where emitted scripts create their named pipes.
    #[serde(default = "paths::fifo_dir")]
    pub fifo_dir: PathBuf,

    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Remote pipe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Host remote pipes bind to and dial.
    #[serde(default = "default_host")]
    pub host: String,

    /// First port the allocator hands out.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Command emitted scripts invoke for remote pipe nodes.
    #[serde(default = "default_pipe_command")]
    pub pipe_command: String,

    /// Connection attempts before a pipe gives up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Pause between connection attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_pipe_command() -> String {
    "dish pipe".to_string()
}

fn default_connect_retries() -> u32 {
    50
}

fn default_retry_delay() -> u64 {
    100
}

impl Default for DishConfig {
    fn default() -> Self {
        Self {
            distributed: false,
            dry_run: false,
            fifo_dir: paths::fifo_dir(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            base_port: default_base_port(),
            pipe_command: default_pipe_command(),
            connect_retries: default_connect_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl DishConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "dish").context("Could not determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DishConfig::default();
        assert!(!config.distributed);
        assert!(!config.dry_run);
        assert_eq!(config.fifo_dir, paths::fifo_dir());
        assert_eq!(config.remote.host, "0.0.0.0");
        assert_eq!(config.remote.base_port, 58000);
        assert_eq!(config.remote.pipe_command, "dish pipe");
        assert_eq!(config.remote.connect_retries, 50);
        assert_eq!(config.remote.retry_delay_ms, 100);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
distributed = true
fifo_dir = "/tmp/dish-fifos"

[remote]
host = "10.0.0.5"
base_port = 40000
pipe_command = "/usr/local/bin/dish pipe"
connect_retries = 5
retry_delay_ms = 20
"#;

        let config: DishConfig = toml::from_str(toml).expect("parse failed");
        assert!(config.distributed);
        assert_eq!(config.fifo_dir, PathBuf::from("/tmp/dish-fifos"));
        assert_eq!(config.remote.host, "10.0.0.5");
        assert_eq!(config.remote.base_port, 40000);
        assert_eq!(config.remote.pipe_command, "/usr/local/bin/dish pipe");
        assert_eq!(config.remote.connect_retries, 5);
        assert_eq!(config.remote.retry_delay_ms, 20);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: DishConfig = toml::from_str("").expect("parse failed");
        assert_eq!(config, DishConfig::default());
    }

    #[test]
    fn test_partial_remote_table_keeps_other_defaults() {
        let config: DishConfig = toml::from_str("[remote]\nbase_port = 1234\n").expect("parse failed");
        assert_eq!(config.remote.base_port, 1234);
        assert_eq!(config.remote.host, "0.0.0.0");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "dry_run = true\n").unwrap();
        let config = DishConfig::load_from(&path).unwrap();
        assert!(config.dry_run);

        let missing = dir.path().join("nope.toml");
        assert!(DishConfig::load_from(&missing).is_err());
    }
}
