//! Configuration management for the health monitor

use crate::errors::{MonitorError, Result};
use crate::probe::ModelKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Where to deliver reports; absent means reports are only printed
    #[serde(default)]
    pub notification: Option<NotificationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Pause between the end of one cycle and the start of the next
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// Maximum number of probes in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout applied to every probe request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval_seconds: DEFAULT_CHECK_INTERVAL_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// One OpenAI-compatible backend and the models to probe on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(rename = "type")]
    pub kind: ModelKind,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub url: Option<String>,
    pub n_channel: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout: u64,
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_notify_timeout() -> u64 {
    DEFAULT_NOTIFY_TIMEOUT_SECS
}

impl Config {
    /// Load, normalize and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MonitorError::Config(format!(
                "configuration file '{}' not found",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, normalize and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        config.validate().map_err(MonitorError::Config)?;
        Ok(config)
    }

    /// Strip trailing slashes so endpoint paths can be appended directly
    pub fn normalize(&mut self) {
        for service in &mut self.services {
            let trimmed = service.base_url.trim_end_matches('/').len();
            service.base_url.truncate(trimmed);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.settings.check_interval_seconds == 0 {
            return Err("check_interval_seconds must be greater than 0".to_string());
        }

        if self.settings.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".to_string());
        }

        if self.settings.request_timeout_seconds == 0 {
            return Err("request_timeout_seconds must be greater than 0".to_string());
        }

        if self.notification.as_ref().is_some_and(|n| n.timeout == 0) {
            return Err("notification timeout must be greater than 0".to_string());
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err("service name cannot be empty".to_string());
            }

            if service.base_url.is_empty() {
                return Err(format!("service '{}' has an empty base_url", service.name));
            }

            if !seen.insert(service.name.as_str()) {
                return Err(format!("duplicate service name '{}'", service.name));
            }
        }

        Ok(())
    }

    /// Replace the configured check interval, e.g. from the command line
    pub fn with_check_interval(mut self, seconds: u64) -> Self {
        self.settings.check_interval_seconds = seconds;
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.settings.check_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.request_timeout_seconds)
    }

    /// Number of (service, model) pairs probed per cycle
    pub fn task_count(&self) -> usize {
        self.services.iter().map(|s| s.models.len()).sum()
    }
}
