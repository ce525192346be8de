//! # Engine Configuration
//!
//! Tunables for the streaming engine, loaded from TOML. Every field has a
//! default, so an empty file is a valid configuration.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [stream]
//! read_chunk_bytes = 8192
//! lines_per_tick = 500
//!
//! [status]
//! min_notify_interval_ms = 1000
//!
//! [safety]
//! fail_safe_commands = ["M104 S0", "M140 S0", "M84"]
//! fail_safe_timeout_ms = 5000
//!
//! [unwrap_service]
//! url = "https://cws.example.com/api/v1/decrypt-psek"
//! timeout_ms = 10000
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration struct for the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub unwrap_service: Option<UnwrapServiceConfig>,
}

/// Reader refill and cooperative tick sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    #[serde(default = "default_lines_per_tick")]
    pub lines_per_tick: usize,
    #[serde(default = "default_tick_budget_ms")]
    pub tick_budget_ms: u64,
    #[serde(default = "default_busy_backoff_ms")]
    pub busy_backoff_ms: u64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: default_read_chunk_bytes(),
            lines_per_tick: default_lines_per_tick(),
            tick_budget_ms: default_tick_budget_ms(),
            busy_backoff_ms: default_busy_backoff_ms(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl StreamConfig {
    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

/// Metadata scan windows.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_header_window_bytes")]
    pub header_window_bytes: usize,
    #[serde(default = "default_footer_window_bytes")]
    pub footer_window_bytes: usize,
    /// Used only for the Z-height layer estimate.
    #[serde(default = "default_assumed_layer_height_mm")]
    pub assumed_layer_height_mm: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            header_window_bytes: default_header_window_bytes(),
            footer_window_bytes: default_footer_window_bytes(),
            assumed_layer_height_mm: default_assumed_layer_height_mm(),
        }
    }
}

/// Host-facing progress notifications.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusConfig {
    #[serde(default = "default_min_notify_interval_ms")]
    pub min_notify_interval_ms: u64,
    #[serde(default)]
    pub display_layer_messages: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            min_notify_interval_ms: default_min_notify_interval_ms(),
            display_layer_messages: false,
        }
    }
}

impl StatusConfig {
    pub fn min_notify_interval(&self) -> Duration {
        Duration::from_millis(self.min_notify_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    #[serde(default = "default_fail_safe_commands")]
    pub fail_safe_commands: Vec<String>,
    /// How long fail-safe commands are retried while the dispatcher is busy.
    #[serde(default = "default_fail_safe_timeout_ms")]
    pub fail_safe_timeout_ms: u64,
    #[serde(default)]
    pub allow_plaintext_jobs: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            fail_safe_commands: default_fail_safe_commands(),
            fail_safe_timeout_ms: default_fail_safe_timeout_ms(),
            allow_plaintext_jobs: false,
        }
    }
}

impl SafetyConfig {
    pub fn fail_safe_timeout(&self) -> Duration {
        Duration::from_millis(self.fail_safe_timeout_ms)
    }
}

/// Remote service that releases wrapping keys for legacy key packages.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnwrapServiceConfig {
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_unwrap_timeout_ms")]
    pub timeout_ms: u64,
}

impl UnwrapServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.read_chunk_bytes == 0 {
            return Err(ConfigError::Validation("stream.read_chunk_bytes must be > 0".to_string()));
        }
        if self.stream.lines_per_tick == 0 {
            return Err(ConfigError::Validation("stream.lines_per_tick must be > 0".to_string()));
        }
        if self.stream.tick_budget_ms == 0 {
            return Err(ConfigError::Validation("stream.tick_budget_ms must be > 0".to_string()));
        }
        if self.scanner.header_window_bytes == 0 && self.scanner.footer_window_bytes == 0 {
            return Err(ConfigError::Validation("scanner windows cannot both be empty".to_string()));
        }
        if self.scanner.assumed_layer_height_mm <= 0.0 {
            return Err(ConfigError::Validation("scanner.assumed_layer_height_mm must be > 0".to_string()));
        }
        if self.safety.fail_safe_commands.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Validation("safety.fail_safe_commands cannot be empty".to_string()));
        }
        if let Some(service) = &self.unwrap_service {
            if service.url.trim().is_empty() {
                return Err(ConfigError::Validation("unwrap_service.url cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_read_chunk_bytes() -> usize { 8192 }
fn default_lines_per_tick() -> usize { 500 }
fn default_tick_budget_ms() -> u64 { 250 }
fn default_busy_backoff_ms() -> u64 { 25 }
fn default_idle_poll_ms() -> u64 { 100 }
fn default_header_window_bytes() -> usize { 200 * 1024 }
fn default_footer_window_bytes() -> usize { 800 * 1024 }
fn default_assumed_layer_height_mm() -> f64 { 0.2 }
fn default_min_notify_interval_ms() -> u64 { 1000 }
fn default_unwrap_timeout_ms() -> u64 { 10_000 }
fn default_fail_safe_timeout_ms() -> u64 { 5_000 }
fn default_fail_safe_commands() -> Vec<String> {
    vec![
        "M104 S0".to_string(),
        "M140 S0".to_string(),
        "M107".to_string(),
        "M84".to_string(),
    ]
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<EngineConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match EngineConfig::from_toml_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to load config '{}': {}", path, e);
                Err(e)
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
