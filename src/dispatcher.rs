//! Concurrent fan-out of probe tasks for one check cycle

use crate::config::Config;
use crate::errors::ProbeError;
use crate::probe::{ModelKind, ProbeRegistry, ProbeTarget};
use crate::report::CheckResult;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

/// One (service, model) pair to probe in the current cycle
#[derive(Debug, Clone)]
pub struct ProbeTask {
    pub service_name: String,
    pub base_url: String,
    pub api_key: String,
    pub model_type: ModelKind,
    pub model_name: String,
}

impl ProbeTask {
    /// Expand every service into one task per declared model
    pub fn from_config(config: &Config) -> Vec<ProbeTask> {
        config
            .services
            .iter()
            .flat_map(|service| {
                service.models.iter().map(move |model| ProbeTask {
                    service_name: service.name.clone(),
                    base_url: service.base_url.trim_end_matches('/').to_string(),
                    api_key: service.api_key.clone(),
                    model_type: model.kind.clone(),
                    model_name: model.name.clone(),
                })
            })
            .collect()
    }

    fn target(&self) -> ProbeTarget<'_> {
        ProbeTarget {
            base_url: &self.base_url,
            api_key: &self.api_key,
            model: &self.model_name,
        }
    }

    fn into_result(self, outcome: Result<(), ProbeError>, latency: Duration) -> CheckResult {
        let latency_ms = latency.as_millis() as u64;
        match outcome {
            Ok(()) => CheckResult::ok(self.service_name, self.model_type, self.model_name, latency_ms),
            Err(e) => CheckResult::error(
                self.service_name,
                self.model_type,
                self.model_name,
                e.to_string(),
                latency_ms,
            ),
        }
    }
}

/// Runs every probe task of a cycle on a bounded pool
#[derive(Clone)]
pub struct Dispatcher {
    client: Client,
    registry: Arc<ProbeRegistry>,
    max_concurrency: usize,
    probe_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        client: Client,
        registry: Arc<ProbeRegistry>,
        max_concurrency: usize,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            max_concurrency: max_concurrency.max(1),
            probe_timeout,
        }
    }

    /// Probe every configured (service, model) pair.
    ///
    /// Returns exactly one result per task, in completion order.
    pub async fn run_all_checks(&self, config: &Config) -> Vec<CheckResult> {
        let tasks = ProbeTask::from_config(config);
        debug!(
            "Dispatching {} probe tasks with concurrency {}",
            tasks.len(),
            self.max_concurrency
        );

        stream::iter(tasks)
            .map(|task| self.spawn_check(task))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }

    /// Run one task on its own tokio task so probes execute in parallel
    async fn spawn_check(&self, task: ProbeTask) -> CheckResult {
        let start = Instant::now();
        let fallback = task.clone();

        let handle = tokio::spawn(check_api(
            self.client.clone(),
            Arc::clone(&self.registry),
            task,
            self.probe_timeout,
        ));

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Probe task for {} / {} did not complete: {}",
                    fallback.service_name, fallback.model_name, e
                );
                let outcome = Err(ProbeError::validation(format!("probe task aborted: {}", e)));
                fallback.into_result(outcome, start.elapsed())
            }
        }
    }
}

/// Probe a single task and classify the outcome
pub async fn check_api(
    client: Client,
    registry: Arc<ProbeRegistry>,
    task: ProbeTask,
    probe_timeout: Duration,
) -> CheckResult {
    let start = Instant::now();

    let outcome = {
        let target = task.target();
        timeout(probe_timeout, registry.run(&client, &task.model_type, &target))
            .await
            .unwrap_or_else(|_| Err(ProbeError::Transport("Timeout")))
    };

    let result = task.into_result(outcome, start.elapsed());
    debug!(
        service = %result.service_name,
        model = %result.model_name,
        status = %result.status,
        latency_ms = result.latency_ms,
        "{}",
        result.describe()
    );
    result
}
