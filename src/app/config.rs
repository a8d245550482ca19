//! Configuration Management

use crate::capture::ring_buffer::{OverflowPolicy, DEFAULT_CAPACITY};
use crate::capture::source::ExemptProcesses;
use crate::workflow::SessionConfig;
use crate::writer::{RetryPolicy, WriterConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Capture settings
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Persistence writer settings
    #[serde(default)]
    pub writer: WriterSection,
    /// Log storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture buffer size in records
    pub ring_buffer_size: usize,
    pub overflow_policy: OverflowMode,
    /// Producer wait before dropping, for `wait_then_drop`
    pub overflow_wait_us: u64,
    /// Processes whose input is never recorded
    pub exempt_processes: Vec<String>,
}

/// What a full capture buffer does with a new record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    #[default]
    DropNewest,
    /// Wait up to `overflow_wait_us`, then drop
    WaitThenDrop,
}

/// Persistence writer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSection {
    pub batch_size: usize,
    pub drain_timeout_ms: u64,
    /// Attempts per run of records, including the first
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub shutdown_flush: bool,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving `.evlog` files
    pub log_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: DEFAULT_CAPACITY,
            overflow_policy: OverflowMode::DropNewest,
            overflow_wait_us: 200,
            exempt_processes: vec!["input-audit-askpass".to_string()],
        }
    }
}

impl Default for WriterSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let writer = WriterConfig::default();
        Self {
            batch_size: writer.batch_size,
            drain_timeout_ms: writer.drain_timeout.as_millis() as u64,
            max_attempts: retry.max_attempts,
            backoff_base_ms: retry.base_delay.as_millis() as u64,
            backoff_max_ms: retry.max_delay.as_millis() as u64,
            shutdown_flush: writer.shutdown_flush,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: Config::base_dir().join("logs"),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    /// Returns Ok(()) if valid, or Err with a description of the first invalid field.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.capture.ring_buffer_size.is_power_of_two() {
            return Err(crate::Error::Config(format!(
                "ring_buffer_size must be a power of 2, got {}",
                self.capture.ring_buffer_size
            )));
        }
        if self.writer.batch_size == 0 {
            return Err(crate::Error::Config("batch_size must be > 0".to_string()));
        }
        if self.writer.drain_timeout_ms == 0 {
            return Err(crate::Error::Config("drain_timeout_ms must be > 0".to_string()));
        }
        if self.writer.max_attempts == 0 {
            return Err(crate::Error::Config("max_attempts must be >= 1".to_string()));
        }
        if self.writer.backoff_base_ms > self.writer.backoff_max_ms {
            return Err(crate::Error::Config(format!(
                "backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
                self.writer.backoff_base_ms, self.writer.backoff_max_ms
            )));
        }
        if self.storage.log_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("log_dir must not be empty".to_string()));
        }
        Ok(())
    }

    /// Buffer policy for `capture.overflow_policy`
    pub fn overflow_policy(&self) -> OverflowPolicy {
        match self.capture.overflow_policy {
            OverflowMode::DropNewest => OverflowPolicy::DropNewest,
            OverflowMode::WaitThenDrop => OverflowPolicy::WaitThenDrop {
                max_wait: Duration::from_micros(self.capture.overflow_wait_us),
            },
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            batch_size: self.writer.batch_size,
            drain_timeout: Duration::from_millis(self.writer.drain_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.writer.max_attempts,
                base_delay: Duration::from_millis(self.writer.backoff_base_ms),
                max_delay: Duration::from_millis(self.writer.backoff_max_ms),
            },
            shutdown_flush: self.writer.shutdown_flush,
        }
    }

    /// Session settings derived from the capture and writer sections
    pub fn session_config(&self) -> Result<SessionConfig, crate::Error> {
        self.validate()?;
        Ok(SessionConfig {
            capacity: self.capture.ring_buffer_size,
            overflow: self.overflow_policy(),
            writer: self.writer_config(),
        })
    }

    pub fn exemption_policy(&self) -> ExemptProcesses {
        ExemptProcesses::new(self.capture.exempt_processes.iter().cloned())
    }

    /// Look up a dotted key such as `writer.batch_size`
    pub fn get(&self, key: &str) -> Result<Option<String>, crate::Error> {
        let value = toml::Value::try_from(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        let found = key
            .split('.')
            .try_fold(&value, |node, part| node.get(part));
        Ok(found.map(|v| match v {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    /// Load config from file
    pub fn load(path: &PathBuf) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from default location
    pub fn load_default() -> Result<Self, crate::Error> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &PathBuf) -> Result<(), crate::Error> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save to default location
    pub fn save_default(&self) -> Result<(), crate::Error> {
        self.save(&Self::default_path())
    }

    /// `~/.input_audit`, or the working directory without a home
    pub fn base_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".input_audit"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    /// Generate TOML representation
    pub fn to_toml(&self) -> Result<String, crate::Error> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }
}
