use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for indexwatch.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP server for metrics, health and the status API.
    #[serde(default)]
    pub server: ServerConfig,

    /// Live progress table.
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Process-wide health gauges.
    #[serde(default)]
    pub gauges: GaugeConfig,

    /// Stream registry queried for offset ranges.
    #[serde(default)]
    pub range_source: RangeSourceConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

/// Live progress table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    /// Render the progress table. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Table redraw period. Default: 5s.
    #[serde(default = "default_progress_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Pending event notifications before submitters wait. Default: 10.
    #[serde(default = "default_progress_queue_capacity")]
    pub event_queue_capacity: usize,

    /// How often each stream's offset range is looked up. Default: 30s.
    #[serde(default = "default_range_refresh_interval", with = "humantime_serde")]
    pub range_refresh_interval: Duration,
}

/// Health gauge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GaugeConfig {
    /// Maintain the health gauges. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Gauge update period. Default: 1s.
    #[serde(default = "default_gauge_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Pending event notifications before submitters wait. Default: 100.
    #[serde(default = "default_gauge_queue_capacity")]
    pub event_queue_capacity: usize,
}

/// Stream registry connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeSourceConfig {
    /// Registry HTTP endpoint (e.g., "http://localhost:8080"). Empty
    /// disables range lookups.
    #[serde(default)]
    pub endpoint: String,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_range_source_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_server_addr() -> String {
    ":9090".to_string()
}

fn default_progress_tick_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_progress_queue_capacity() -> usize {
    10
}

fn default_range_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_gauge_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_gauge_queue_capacity() -> usize {
    100
}

fn default_range_source_timeout() -> Duration {
    Duration::from_secs(10)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            progress: ProgressConfig::default(),
            gauges: GaugeConfig::default(),
            range_source: RangeSourceConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: default_progress_tick_interval(),
            event_queue_capacity: default_progress_queue_capacity(),
            range_refresh_interval: default_range_refresh_interval(),
        }
    }
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: default_gauge_tick_interval(),
            event_queue_capacity: default_gauge_queue_capacity(),
        }
    }
}

impl Default for RangeSourceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: default_range_source_timeout(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("loading config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("parsing config")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.addr.is_empty() {
            bail!("server.addr is required");
        }

        if self.progress.enabled {
            if self.progress.tick_interval.is_zero() {
                bail!("progress.tick_interval must be positive");
            }
            if self.progress.event_queue_capacity == 0 {
                bail!("progress.event_queue_capacity must be positive");
            }
            if self.progress.range_refresh_interval.is_zero() {
                bail!("progress.range_refresh_interval must be positive");
            }
        }

        if self.gauges.enabled {
            if self.gauges.tick_interval.is_zero() {
                bail!("gauges.tick_interval must be positive");
            }
            if self.gauges.event_queue_capacity == 0 {
                bail!("gauges.event_queue_capacity must be positive");
            }
        }

        let endpoint = &self.range_source.endpoint;
        if !endpoint.is_empty()
            && !endpoint.starts_with("http://")
            && !endpoint.starts_with("https://")
        {
            bail!("range_source.endpoint must be an http(s) URL, got {endpoint:?}");
        }

        Ok(())
    }
}
