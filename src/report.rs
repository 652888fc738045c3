//! Check results and the report built from them

use crate::probe::ModelKind;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Marker carried in the details of a passing check
pub const HEALTHY_DETAILS: &str = "healthy";

const SEPARATOR: &str = "--------------------------------------------------";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckStatus {
    Ok,
    Error,
}

impl CheckStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Error => "ERROR",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "✅",
            CheckStatus::Error => "❌",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome of one probe task in one cycle
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub service_name: String,
    pub model_type: ModelKind,
    pub model_name: String,
    pub status: CheckStatus,
    pub details: String,
    pub latency_ms: u64,
}

impl CheckResult {
    pub fn ok(service_name: String, model_type: ModelKind, model_name: String, latency_ms: u64) -> Self {
        Self {
            service_name,
            model_type,
            model_name,
            status: CheckStatus::Ok,
            details: HEALTHY_DETAILS.to_string(),
            latency_ms,
        }
    }

    pub fn error(
        service_name: String,
        model_type: ModelKind,
        model_name: String,
        details: String,
        latency_ms: u64,
    ) -> Self {
        Self {
            service_name,
            model_type,
            model_name,
            status: CheckStatus::Error,
            details,
            latency_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }

    /// Ordering key: service, then status label, then the remaining fields
    fn sort_key(&self) -> (&str, &'static str, String, &str, &str) {
        (
            &self.service_name,
            self.status.label(),
            self.model_type.to_string(),
            &self.model_name,
            &self.details,
        )
    }

    /// One listing line with latency, used for per-result logging
    pub fn describe(&self) -> String {
        format!(
            "{} [{}] {} - {} ({}) | latency: {}ms",
            self.status.icon(),
            self.status,
            self.service_name,
            self.model_type.to_string().to_uppercase(),
            self.model_name,
            self.latency_ms
        )
    }
}

/// Aggregate counts for a cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub total: usize,
    pub ok: usize,
    pub error: usize,
}

impl ReportSummary {
    pub fn from_results(results: &[CheckResult]) -> Self {
        let ok = results.iter().filter(|r| r.is_ok()).count();
        Self {
            total: results.len(),
            ok,
            error: results.len() - ok,
        }
    }
}

/// Results in report order
pub fn sorted_results(results: &[CheckResult]) -> Vec<&CheckResult> {
    let mut sorted: Vec<&CheckResult> = results.iter().collect();
    sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    sorted
}

/// Format a report stamped with the current local time
pub fn format_report(results: &[CheckResult]) -> String {
    format_report_at(results, Local::now())
}

/// Format a report: a header with counts, then one line per failed check.
///
/// Passing checks only contribute to the counts. The output depends on the
/// set of results, not on the order they were collected in.
pub fn format_report_at(results: &[CheckResult], timestamp: DateTime<Local>) -> String {
    let summary = ReportSummary::from_results(results);

    let mut lines = vec![
        format!(
            "📋 API health report ({})",
            timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        format!(
            "Total: {} | ✅ OK: {} | ❌ ERROR: {}",
            summary.total, summary.ok, summary.error
        ),
        SEPARATOR.to_string(),
    ];

    lines.extend(
        sorted_results(results)
            .into_iter()
            .filter(|r| !r.is_ok())
            .map(|r| format!("{} [{}] {} {}", r.status.icon(), r.status, r.service_name, r.details)),
    );

    let mut report = lines.join("\n");
    report.push('\n');
    report
}
