//! API Health Monitor Library
//!
//! This library probes the chat, text-to-speech and speech-to-text endpoints of
//! OpenAI-compatible services on a fixed interval, summarizes the outcome in a
//! report and forwards that report to a notification endpoint.

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod monitor;
pub mod notifier;
pub mod probe;
pub mod report;

pub use config::Config;
pub use dispatcher::{Dispatcher, ProbeTask};
pub use errors::{MonitorError, ProbeError, Result};
pub use monitor::{CycleOutcome, HealthMonitor, MonitorEvent, MonitorState};
pub use notifier::{NotificationTarget, Notifier, NotifyChannel};
pub use probe::{ModelKind, Probe, ProbeRegistry};
pub use report::{CheckResult, CheckStatus, ReportSummary, format_report};
