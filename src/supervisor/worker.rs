//! Worker process lifecycle
//!
//! One long-running transcode per live feed. Starting spawns the tool with
//! stderr handed to a scanner task; stopping escalates SIGTERM to a kill after
//! the grace period and always unregisters the worker.

use chrono::{DateTime, Utc};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{ErrorFlags, ProcessRegistry};
use super::scanner::{spawn_scanner, ScanSummary};
use crate::error::{FeedwatchError, Result};
use crate::feed::Feed;
use crate::overlay::{CommandSpec, ToolCommands};

/// How long a scanner may keep draining after its process has exited
const SCANNER_DRAIN: Duration = Duration::from_millis(500);

/// Produces the command line for a feed's worker
pub trait WorkerLauncher: Send + Sync {
    fn command(&self, feed: &Feed) -> Result<CommandSpec>;
}

impl WorkerLauncher for ToolCommands {
    fn command(&self, feed: &Feed) -> Result<CommandSpec> {
        self.worker(feed)
    }
}

/// How a worker left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No worker was registered for the feed
    NotRunning,
    /// The process had already exited before stop was requested
    AlreadyExited(ExitStatus),
    /// The process exited within the grace period
    Graceful(ExitStatus),
    /// The process ignored SIGTERM and was killed
    Killed,
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopOutcome::NotRunning => write!(f, "not running"),
            StopOutcome::AlreadyExited(status) => write!(f, "already exited ({})", status),
            StopOutcome::Graceful(status) => write!(f, "exited gracefully ({})", status),
            StopOutcome::Killed => write!(f, "killed after grace period"),
        }
    }
}

/// A running worker and the scanner watching its stderr
#[derive(Debug)]
pub struct WorkerHandle {
    feed: Feed,
    child: Child,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    scanner: JoinHandle<ScanSummary>,
}

impl WorkerHandle {
    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Exit status if the process has exited on its own
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    async fn terminate(&mut self, grace: Duration) -> StopOutcome {
        let outcome = match self.child.try_wait() {
            Ok(Some(status)) => StopOutcome::AlreadyExited(status),
            _ => {
                self.request_termination();
                match tokio::time::timeout(grace, self.child.wait()).await {
                    Ok(Ok(status)) => StopOutcome::Graceful(status),
                    Ok(Err(e)) => {
                        warn!("Waiting on {} worker failed: {}", self.feed, e);
                        self.force_kill().await
                    }
                    Err(_) => {
                        warn!(
                            "{} worker did not exit within {:?}, killing",
                            self.feed, grace
                        );
                        self.force_kill().await
                    }
                }
            }
        };

        self.finish_scanner().await;
        outcome
    }

    #[cfg(unix)]
    fn request_termination(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to {} worker (pid {}) failed: {}", self.feed, pid, e);
        }
    }

    #[cfg(not(unix))]
    fn request_termination(&mut self) {
        let _ = self.child.start_kill();
    }

    async fn force_kill(&mut self) -> StopOutcome {
        if let Err(e) = self.child.kill().await {
            error!("Failed to kill {} worker: {}", self.feed, e);
        }
        StopOutcome::Killed
    }

    /// Give the scanner a moment to drain, then cancel it
    async fn finish_scanner(&mut self) {
        match tokio::time::timeout(SCANNER_DRAIN, &mut self.scanner).await {
            Ok(Ok(summary)) => {
                debug!("Scanner for {} finished after {} lines", self.feed, summary.lines)
            }
            Ok(Err(e)) => debug!("Scanner for {} ended abnormally: {}", self.feed, e),
            Err(_) => {
                self.scanner.abort();
                debug!("Scanner for {} cancelled", self.feed);
            }
        }
    }
}

/// Starts and stops workers, owning the registry for the current generation
pub struct WorkerManager {
    launcher: Arc<dyn WorkerLauncher>,
    registry: ProcessRegistry,
    flags: ErrorFlags,
    stop_grace: Duration,
}

impl WorkerManager {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, flags: ErrorFlags, stop_grace: Duration) -> Self {
        Self {
            launcher,
            registry: ProcessRegistry::new(),
            flags,
            stop_grace,
        }
    }

    pub fn flags(&self) -> &ErrorFlags {
        &self.flags
    }

    pub fn is_running(&self, feed: &str) -> bool {
        self.registry.contains(feed)
    }

    pub fn running(&self) -> Vec<String> {
        self.registry.feed_names()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn pid(&self, feed: &str) -> Option<u32> {
        self.registry.get(feed).and_then(|h| h.pid())
    }

    /// Exit status of a registered worker that has exited on its own
    pub fn exit_status(&mut self, feed: &str) -> Result<Option<ExitStatus>> {
        match self.registry.get_mut(feed) {
            Some(handle) => handle.try_exit(),
            None => Ok(None),
        }
    }

    /// Spawn a worker for `feed` and register it with a cleared error flag
    pub async fn start(&mut self, feed: &Feed) -> Result<()> {
        if self.registry.contains(feed.name()) {
            return Err(FeedwatchError::WorkerAlreadyRunning(feed.name().to_string()));
        }

        let spec = self.launcher.command(feed)?;
        let mut cmd = spec.to_command();
        cmd.stderr(Stdio::piped()).kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| FeedwatchError::Spawn {
            feed: feed.name().to_string(),
            source,
        })?;
        let pid = child.id();

        // Cleared before the scanner exists so an early match is not lost
        self.flags.reset(feed.name()).await;

        let scanner = match child.stderr.take() {
            Some(stderr) => spawn_scanner(feed.name().to_string(), stderr, self.flags.clone()),
            None => tokio::spawn(async { ScanSummary::default() }),
        };

        self.registry.insert(WorkerHandle {
            feed: feed.clone(),
            child,
            pid,
            started_at: Utc::now(),
            scanner,
        });

        info!(
            "Started worker for {} (pid {}, label {})",
            feed,
            pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()),
            feed.label()
        );
        Ok(())
    }

    /// Stop the feed's worker if there is one. Always unregisters and clears the flag.
    pub async fn stop(&mut self, feed: &str) -> StopOutcome {
        self.stop_with_grace(feed, self.stop_grace).await
    }

    pub async fn stop_with_grace(&mut self, feed: &str, grace: Duration) -> StopOutcome {
        let Some(mut handle) = self.registry.remove(feed) else {
            return StopOutcome::NotRunning;
        };

        let outcome = handle.terminate(grace).await;
        self.flags.reset(feed).await;

        let uptime = Utc::now().signed_duration_since(handle.started_at());
        info!(
            "Stopped worker for {}: {} (uptime {}s)",
            feed,
            outcome,
            uptime.num_seconds()
        );
        outcome
    }

    /// Stop every registered worker
    pub async fn stop_all(&mut self, grace: Duration) {
        for feed in self.registry.feed_names() {
            self.stop_with_grace(&feed, grace).await;
        }
    }
}
