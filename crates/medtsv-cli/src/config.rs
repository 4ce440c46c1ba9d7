//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use medtsv_core::{DEFAULT_CHUNK_ROWS, HttpConfig, RetryPolicy};
use serde::Deserialize;

/// Global configuration for medtsv
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub pubmed: PubmedConfig,
    pub http: HttpSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_dir: PathBuf,
    pub chunk_rows: u64,
    pub chunk_prefix: String,
    pub channel_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from("./data"),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            chunk_prefix: "pubmed".to_string(),
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubmedConfig {
    pub base_url: String,
    /// Two-digit baseline year; current year when unset
    pub year: Option<u16>,
    pub mirror_dir: Option<PathBuf>,
}

impl Default for PubmedConfig {
    fn default() -> Self {
        Self {
            base_url: medtsv_pubmed::DEFAULT_BASE_URL.to_string(),
            year: None,
            mirror_dir: None,
        }
    }
}

/// Transport settings; durations in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub transfer_timeout: u64,
    /// Bytes per second; 0 disables the check
    pub min_speed: u64,
    pub speed_grace: u64,
    pub transport_retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let d = HttpConfig::default();
        Self {
            connect_timeout: d.connect_timeout.as_secs(),
            read_timeout: d.read_timeout.as_secs(),
            transfer_timeout: d.transfer_timeout.as_secs(),
            min_speed: d.min_speed,
            speed_grace: d.speed_grace.as_secs(),
            transport_retries: d.transport_retries,
        }
    }
}

impl HttpSettings {
    pub fn to_http_config(self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            transfer_timeout: Duration::from_secs(self.transfer_timeout),
            min_speed: self.min_speed,
            speed_grace: Duration::from_secs(self.speed_grace),
            transport_retries: self.transport_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Backoff unit in seconds; attempt `n` waits `unit * 2^n`
    pub backoff_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let d = RetryPolicy::default();
        Self {
            max_attempts: d.max_attempts,
            backoff_secs: d.backoff_unit.as_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_unit: Duration::from_secs(self.backoff_secs),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./medtsv.toml (current directory)
    /// 2. ~/.config/medtsv/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("medtsv.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "medtsv") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
