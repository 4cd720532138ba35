//! Configuration management.
//!
//! flowgate configuration can come from:
//! - Config file (~/.config/flowgate/config.toml)
//! - Environment variables (FLOWGATE_*), which win over the file
//!
//! ```toml
//! [executor]
//! concurrency = 256
//! retries = 2
//! base_delay_ms = 50
//! timeout_ms = 50        # omit for no timeout
//! failure_mode = "partial"
//!
//! [limiter]
//! rate = 200.0
//! burst = 200.0
//!
//! [log]
//! format = "pretty"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ExecutorConfig, FailureMode, RateLimitConfig, RetryPolicy};
use crate::error::{Error, Result};

/// flowgate configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub limiter: LimiterSettings,

    #[serde(default)]
    pub log: LogConfig,
}

/// Bounded executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Maximum operations in progress
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries per item after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Backoff unit in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-attempt timeout in milliseconds; absent means unbounded
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retries: default_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_ms: None,
            failure_mode: FailureMode::default(),
        }
    }
}

fn default_concurrency() -> usize {
    256
}

fn default_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    50
}

impl ExecutorSettings {
    /// Convert to a typed executor configuration.
    pub fn to_executor_config(&self) -> Result<ExecutorConfig> {
        if self.concurrency == 0 {
            return Err(Error::Config("executor.concurrency must be at least 1".to_string()));
        }
        if self.base_delay_ms == 0 {
            return Err(Error::Config("executor.base_delay_ms must be positive".to_string()));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::Config(
                "executor.timeout_ms must be positive; omit it for no timeout".to_string(),
            ));
        }
        Ok(ExecutorConfig {
            concurrency: self.concurrency,
            retry: RetryPolicy::new(
                self.retries,
                Duration::from_millis(self.base_delay_ms),
                self.timeout_ms.map(Duration::from_millis),
            ),
            failure_mode: self.failure_mode,
        })
    }
}

/// Token bucket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Tokens per second
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Bucket capacity (defaults to rate)
    #[serde(default)]
    pub burst: Option<f64>,

    /// Starting tokens (defaults to burst)
    #[serde(default)]
    pub init_tokens: Option<f64>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: None,
            init_tokens: None,
        }
    }
}

fn default_rate() -> f64 {
    200.0
}

impl LimiterSettings {
    pub fn to_rate_limit_config(&self) -> Result<RateLimitConfig> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(Error::Config(format!(
                "limiter.rate must be positive, got {}",
                self.rate
            )));
        }
        Ok(RateLimitConfig {
            rate: self.rate,
            burst: self.burst,
            init_tokens: self.init_tokens,
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_filter() -> String {
    "flowgate=info".to_string()
}

impl Config {
    /// Load configuration from the default location, then apply env overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir().join("config.toml");
        let mut config = if path.exists() {
            Self::from_path(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from an explicit file, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_path(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("flowgate"))
            .unwrap_or_else(|| PathBuf::from(".flowgate"))
    }

    fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("FLOWGATE_CONCURRENCY") {
            self.executor.concurrency = parse_env("FLOWGATE_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("FLOWGATE_RETRIES") {
            self.executor.retries = parse_env("FLOWGATE_RETRIES", &v)?;
        }
        if let Some(v) = var("FLOWGATE_BASE_DELAY_MS") {
            self.executor.base_delay_ms = parse_env("FLOWGATE_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = var("FLOWGATE_TIMEOUT_MS") {
            self.executor.timeout_ms = match v.trim() {
                "" | "none" | "0" => None,
                other => Some(parse_env("FLOWGATE_TIMEOUT_MS", other)?),
            };
        }
        if let Some(v) = var("FLOWGATE_RATE") {
            self.limiter.rate = parse_env("FLOWGATE_RATE", &v)?;
        }
        if let Some(v) = var("FLOWGATE_BURST") {
            self.limiter.burst = Some(parse_env("FLOWGATE_BURST", &v)?);
        }
        if let Some(v) = var("FLOWGATE_LOG_FORMAT") {
            self.log.format = match v.trim().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(Error::Config(format!(
                        "FLOWGATE_LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                        other
                    )))
                }
            };
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}='{}': {}", key, value, e)))
}
