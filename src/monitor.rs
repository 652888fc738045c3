//! Check cycle driver: dispatch, report, notify, sleep, repeat

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::errors::{MonitorError, Result};
use crate::notifier::Notifier;
use crate::probe::ProbeRegistry;
use crate::report::{CheckResult, ReportSummary, format_report};

use chrono::Local;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration, Instant, sleep};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Lifecycle of the monitor process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    RunningCycle,
    Sleeping,
    /// Configuration was rejected at startup; no cycle will ever run
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    CycleStarted,
    CycleFinished,
    CycleFailed,
    ConfigRejected,
    Woke,
}

impl MonitorState {
    /// Apply `event`; events that do not apply to the current state leave it unchanged
    pub fn next(self, event: MonitorEvent) -> MonitorState {
        use MonitorEvent::*;
        use MonitorState::*;

        match (self, event) {
            (Fatal, _) => Fatal,
            (Idle, ConfigRejected) => Fatal,
            (Idle, CycleStarted) => RunningCycle,
            (RunningCycle, CycleFinished) | (RunningCycle, CycleFailed) => Sleeping,
            (Sleeping, Woke) => Idle,
            (state, _) => state,
        }
    }
}

/// Everything produced by one completed cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: String,
    pub results: Vec<CheckResult>,
    pub summary: ReportSummary,
    pub report: String,
    pub duration: Duration,
}

/// Runs check cycles on a fixed interval until shut down
pub struct HealthMonitor {
    config: Arc<Config>,
    dispatcher: Dispatcher,
    notifier: Arc<Notifier>,
    monitor_id: String,
    interval: Duration,
    state: MonitorState,
    cycles_completed: u64,
    cycles_failed: u64,
}

impl HealthMonitor {
    /// Build the monitor and the HTTP client shared by every cycle
    pub fn new(mut config: Config) -> Result<Self> {
        config.normalize();
        config.validate().map_err(MonitorError::Config)?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("api_health_monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MonitorError::Http)?;

        let registry = Arc::new(ProbeRegistry::new()?);
        let dispatcher = Dispatcher::new(
            client.clone(),
            registry,
            config.settings.max_concurrency,
            config.request_timeout(),
        );
        let notifier = Arc::new(Notifier::new(client, config.notification.as_ref()));

        Ok(Self {
            interval: config.check_interval(),
            config: Arc::new(config),
            dispatcher,
            notifier,
            monitor_id: Uuid::new_v4().to_string(),
            state: MonitorState::Idle,
            cycles_completed: 0,
            cycles_failed: 0,
        })
    }

    /// Override the pause between cycles
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed
    }

    /// Run until ctrl-c
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "Health monitor {} started: {} probes every {}s. Press Ctrl+C to exit.",
            self.monitor_id,
            self.config.task_count(),
            self.interval.as_secs()
        );

        self.run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run cycles until `shutdown` resolves. A failed cycle is logged and
    /// retried after the normal interval.
    #[instrument(skip(self, shutdown), fields(monitor_id = %self.monitor_id))]
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.transition(MonitorEvent::CycleStarted);
            let mut cycle = self.spawn_cycle();

            let joined = tokio::select! {
                joined = &mut cycle => Some(joined),
                _ = &mut shutdown => None,
            };
            let Some(joined) = joined else {
                cycle.abort();
                break;
            };

            match joined {
                Ok(outcome) => {
                    self.cycles_completed += 1;
                    self.transition(MonitorEvent::CycleFinished);
                    info!(
                        cycle_id = %outcome.cycle_id,
                        total = outcome.summary.total,
                        ok = outcome.summary.ok,
                        error = outcome.summary.error,
                        "Cycle complete"
                    );
                    println!("Next check in {} seconds...", self.interval.as_secs());
                }
                Err(e) => {
                    self.cycles_failed += 1;
                    self.transition(MonitorEvent::CycleFailed);
                    let err = MonitorError::Cycle(e.to_string());
                    error!("Unexpected error in check loop: {}", err);
                    println!("Retrying in {} seconds...", self.interval.as_secs());
                }
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = &mut shutdown => break,
            }
            self.transition(MonitorEvent::Woke);
        }

        self.shutdown().await;
        Ok(())
    }

    /// Run exactly one cycle without the trailing sleep
    pub async fn run_once(&mut self) -> Result<CycleOutcome> {
        self.transition(MonitorEvent::CycleStarted);

        match self.spawn_cycle().await {
            Ok(outcome) => {
                self.cycles_completed += 1;
                self.transition(MonitorEvent::CycleFinished);
                self.transition(MonitorEvent::Woke);
                Ok(outcome)
            }
            Err(e) => {
                self.cycles_failed += 1;
                self.transition(MonitorEvent::CycleFailed);
                self.transition(MonitorEvent::Woke);
                Err(MonitorError::Cycle(e.to_string()))
            }
        }
    }

    /// Each cycle runs on its own task so a panic anywhere in it stays contained
    fn spawn_cycle(&self) -> tokio::task::JoinHandle<CycleOutcome> {
        let config = Arc::clone(&self.config);
        let dispatcher = self.dispatcher.clone();
        let notifier = Arc::clone(&self.notifier);

        tokio::spawn(async move { execute_cycle(&config, &dispatcher, &notifier).await })
    }

    fn transition(&mut self, event: MonitorEvent) {
        self.state = self.state.next(event);
    }

    async fn shutdown(&self) {
        println!("\nInterrupt received, shutting down.");
        info!("Performing graceful shutdown");

        let metrics = self.notifier.metrics().await;
        info!(
            "Final metrics - Cycles: {} completed, {} failed. Notifications: {:.1}% success rate, {} attempts, avg {}ms",
            self.cycles_completed,
            self.cycles_failed,
            metrics.success_rate,
            metrics.attempts,
            metrics.avg_duration_ms
        );

        info!("Health monitor shutdown complete");
    }
}

/// Probe everything, print and deliver the report
pub async fn execute_cycle(config: &Config, dispatcher: &Dispatcher, notifier: &Notifier) -> CycleOutcome {
    let cycle_id = Uuid::new_v4().to_string();
    println!(
        "\n[{}] Starting check cycle...",
        Local::now().format("%H:%M:%S")
    );
    info!(cycle_id = %cycle_id, "Starting check cycle");

    let start = Instant::now();
    let results = dispatcher.run_all_checks(config).await;
    let duration = start.elapsed();

    println!(
        "[{}] All checks finished in {:.2} seconds.",
        Local::now().format("%H:%M:%S"),
        duration.as_secs_f64()
    );

    let summary = ReportSummary::from_results(&results);
    if summary.error > 0 {
        warn!(cycle_id = %cycle_id, "{} of {} checks failed", summary.error, summary.total);
    }

    let report = format_report(&results);
    println!("\n--- Check results ---");
    println!("{}", report);
    println!("--- End of report ---\n");

    notifier.notify(&report).await;

    CycleOutcome {
        cycle_id,
        results,
        summary,
        report,
        duration,
    }
}
