//! Supervisor loop
//!
//! ```text
//! loop {
//!   ├─► for each feed: probe
//!   │     ├─ live, no worker   ─► start
//!   │     └─ not live, worker  ─► stop
//!   ├─► reconcile running workers
//!   │     └─ escalate ─► stop all, return RestartRequested
//!   └─► sleep(poll_interval)  (woken by shutdown)
//! }
//! shutdown ─► stop all, return Shutdown
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::prober::{FeedProber, LivenessProbe};
use super::reconciler::Reconciler;
use super::registry::ErrorFlags;
use super::worker::{WorkerLauncher, WorkerManager};
use crate::config::SupervisorSettings;
use crate::coordination::{GracefulShutdown, ShutdownPhase, ShutdownSignal};
use crate::feed::Feed;

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Shutdown was requested; all workers are stopped
    Shutdown,
    /// Reconciler escalated; all workers are stopped and state should be rebuilt
    RestartRequested,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub live: Vec<String>,
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
    pub escalate: bool,
    /// Shutdown was observed before the cycle finished probing
    pub interrupted: bool,
}

/// Supervision state for one generation
pub struct Supervisor {
    generation: u64,
    feeds: Vec<Feed>,
    prober: FeedProber,
    workers: WorkerManager,
    reconciler: Reconciler,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(
        generation: u64,
        feeds: Vec<Feed>,
        probe: Arc<dyn LivenessProbe>,
        launcher: Arc<dyn WorkerLauncher>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            generation,
            feeds,
            prober: FeedProber::new(probe, settings.probe_failure_threshold),
            workers: WorkerManager::new(launcher, ErrorFlags::new(), settings.stop_grace),
            reconciler: Reconciler::new(settings.escalation_threshold, settings.restart_cooldown),
            settings,
        }
    }

    pub fn workers(&self) -> &WorkerManager {
        &self.workers
    }

    pub fn workers_mut(&mut self) -> &mut WorkerManager {
        &mut self.workers
    }

    /// Probe every feed, start/stop workers accordingly, then reconcile
    pub async fn run_cycle(&mut self, shutdown: &GracefulShutdown) -> CycleReport {
        let mut report = CycleReport::default();

        for feed in &self.feeds {
            if shutdown.is_shutdown_requested() {
                report.interrupted = true;
                return report;
            }

            let result = self.prober.probe(feed).await;
            let running = self.workers.is_running(feed.name());

            if result.live {
                report.live.push(feed.name().to_string());
                if !running {
                    match self.workers.start(feed).await {
                        Ok(()) => report.started.push(feed.name().to_string()),
                        Err(e) => error!("Could not start worker for {}: {}", feed, e),
                    }
                }
            } else if running {
                warn!(
                    "Feed {} is no longer live after {} failed probes, stopping its worker",
                    feed, result.consecutive_failures
                );
                self.workers.stop(feed.name()).await;
                report.stopped.push(feed.name().to_string());
            }
        }

        let outcome = self.reconciler.reconcile(&self.feeds, &mut self.workers).await;
        report.restarted = outcome.restarted;
        report.escalate = outcome.escalate;

        info!("Active feeds now: {:?}", report.live);
        report
    }

    /// Run cycles until shutdown or escalation. Workers are always stopped on return.
    pub async fn run(mut self, shutdown: Arc<GracefulShutdown>) -> LoopExit {
        info!(
            "Supervisor generation {} watching {} feeds",
            self.generation,
            self.feeds.len()
        );

        loop {
            let report = self.run_cycle(&shutdown).await;

            if report.escalate {
                warn!(
                    "Generation {} requested restart, stopping {} workers",
                    self.generation,
                    self.workers.len()
                );
                self.workers.stop_all(self.settings.stop_grace).await;
                return LoopExit::RestartRequested;
            }

            if report.interrupted || shutdown.is_shutdown_requested() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.wait() => {}
            }

            if shutdown.is_shutdown_requested() {
                break;
            }
        }

        self.shutdown(&shutdown).await;
        LoopExit::Shutdown
    }

    async fn shutdown(&mut self, shutdown: &GracefulShutdown) {
        info!("Stopping feed monitor");
        shutdown.set_phase(ShutdownPhase::StoppingWorkers);

        let grace = match shutdown.signal() {
            Some(ShutdownSignal::Urgent) => Duration::ZERO,
            _ => self.settings.stop_grace,
        };
        self.workers.stop_all(grace).await;

        shutdown.set_phase(ShutdownPhase::Complete);
    }
}
