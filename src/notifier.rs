//! Delivery of cycle reports to the configured notification endpoint

use crate::config::NotificationConfig;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use serde_json::json;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Characters left unescaped when the report becomes a single path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyChannel {
    /// Report embedded in the path of a GET request
    Bark,
    /// Report posted as `{"content": ...}`
    Webhook,
}

impl From<Option<&str>> for NotifyChannel {
    fn from(channel: Option<&str>) -> Self {
        match channel {
            Some("bark") => NotifyChannel::Bark,
            _ => NotifyChannel::Webhook,
        }
    }
}

/// A fully specified destination for reports
#[derive(Debug, Clone)]
pub struct NotificationTarget {
    pub url: String,
    pub channel: NotifyChannel,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl NotificationTarget {
    /// Build a target, or `None` when no url is configured
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        let url = config.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;

        Some(Self {
            url: url.to_string(),
            channel: NotifyChannel::from(config.n_channel.as_deref()),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(config.timeout),
        })
    }

    /// Request url for a bark push carrying `report`
    pub fn bark_url(&self, report: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            utf8_percent_encode(report, PATH_SEGMENT)
        )
    }
}

/// Why a delivery attempt failed
#[derive(Debug)]
pub enum NotifyError {
    /// Endpoint answered with a non-2xx status
    Status { status: u16, body: String },

    /// Request could not be completed
    Transport(reqwest::Error),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Status { status, body } => {
                write!(f, "notification endpoint returned {}: {}", status, body)
            }
            NotifyError::Transport(err) => write!(f, "failed to send notification: {}", err),
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err)
    }
}

/// Best-effort report delivery
#[derive(Debug)]
pub struct Notifier {
    client: Client,
    target: Option<NotificationTarget>,
    metrics: DeliveryMetrics,
}

impl Notifier {
    pub fn new(client: Client, config: Option<&NotificationConfig>) -> Self {
        Self {
            client,
            target: config.and_then(NotificationTarget::from_config),
            metrics: DeliveryMetrics::default(),
        }
    }

    pub fn target(&self) -> Option<&NotificationTarget> {
        self.target.as_ref()
    }

    /// Send `report`; failures are logged and never returned
    pub async fn notify(&self, report: &str) {
        let Some(target) = &self.target else {
            info!("No notification endpoint configured, skipping delivery");
            return;
        };

        let start = Instant::now();
        let outcome = self.deliver(target, report).await;
        self.metrics.record(outcome.is_ok(), start.elapsed()).await;

        match outcome {
            Ok(()) => info!("Report delivered to {}", target.url),
            Err(NotifyError::Status { status, body }) => error!(
                "Notification endpoint {} returned error status {}: {}",
                target.url, status, body
            ),
            Err(NotifyError::Transport(e)) => {
                error!("Failed to send notification to {}: {}", target.url, e)
            }
        }
    }

    /// Single delivery attempt
    pub async fn deliver(&self, target: &NotificationTarget, report: &str) -> Result<(), NotifyError> {
        let response = match target.channel {
            NotifyChannel::Bark => {
                debug!("Sending bark notification");
                self.client
                    .get(target.bark_url(report))
                    .timeout(target.timeout)
                    .send()
                    .await?
            }
            NotifyChannel::Webhook => {
                debug!("Sending webhook notification");
                let mut request = self
                    .client
                    .post(&target.url)
                    .timeout(target.timeout)
                    .json(&json!({ "content": report }));

                if let Some(key) = &target.api_key {
                    request = request.header(AUTHORIZATION, format!("Bearer {}", key));
                }

                request.send().await?
            }
        };

        Self::handle_response(response).await
    }

    async fn handle_response(response: Response) -> Result<(), NotifyError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn metrics(&self) -> DeliveryMetricsSnapshot {
        self.metrics.snapshot().await
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DeliveryCounters {
    attempts: u64,
    successes: u64,
    failures: u64,
    total_duration: Duration,
}

/// Delivery outcome tracking
#[derive(Debug, Default)]
struct DeliveryMetrics {
    counters: RwLock<DeliveryCounters>,
}

impl DeliveryMetrics {
    async fn record(&self, success: bool, duration: Duration) {
        let mut counters = self.counters.write().await;
        counters.attempts += 1;
        if success {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        counters.total_duration += duration;
    }

    async fn snapshot(&self) -> DeliveryMetricsSnapshot {
        let counters = *self.counters.read().await;

        let success_rate = if counters.attempts > 0 {
            (counters.successes as f64 / counters.attempts as f64) * 100.0
        } else {
            0.0
        };

        let avg_duration = if counters.attempts > 0 {
            counters.total_duration / counters.attempts as u32
        } else {
            Duration::ZERO
        };

        DeliveryMetricsSnapshot {
            attempts: counters.attempts,
            successes: counters.successes,
            failures: counters.failures,
            success_rate,
            avg_duration_ms: avg_duration.as_millis() as u64,
        }
    }
}

/// Snapshot of delivery metrics
#[derive(Debug, Clone)]
pub struct DeliveryMetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_duration_ms: u64,
}
