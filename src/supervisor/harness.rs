//! Generation harness
//!
//! Runs supervisor generations back to back. A generation that escalates has
//! already stopped its workers; the harness then either builds fresh state
//! in-process or replaces the process image, per [`RestartMode`].

use std::sync::Arc;
use tracing::{error, info, warn};

use super::prober::LivenessProbe;
use super::runner::{LoopExit, Supervisor};
use super::worker::WorkerLauncher;
use crate::config::{RestartMode, SupervisorSettings};
use crate::coordination::GracefulShutdown;
use crate::error::{FeedwatchError, Result};
use crate::feed::Feed;

pub struct Harness {
    feeds: Vec<Feed>,
    probe: Arc<dyn LivenessProbe>,
    launcher: Arc<dyn WorkerLauncher>,
    settings: SupervisorSettings,
    restart_mode: RestartMode,
}

impl Harness {
    pub fn new(
        feeds: Vec<Feed>,
        probe: Arc<dyn LivenessProbe>,
        launcher: Arc<dyn WorkerLauncher>,
        settings: SupervisorSettings,
        restart_mode: RestartMode,
    ) -> Self {
        Self {
            feeds,
            probe,
            launcher,
            settings,
            restart_mode,
        }
    }

    /// Run until shutdown. Returns the number of generations that ran.
    pub async fn run(&self, shutdown: Arc<GracefulShutdown>) -> Result<u64> {
        let mut generation = 1;
        info!("Escalation restart mode: {}", self.restart_mode);

        loop {
            let supervisor = Supervisor::new(
                generation,
                self.feeds.clone(),
                self.probe.clone(),
                self.launcher.clone(),
                self.settings.clone(),
            );

            match supervisor.run(shutdown.clone()).await {
                LoopExit::Shutdown => {
                    info!("Feed monitor stopped after {} generation(s)", generation);
                    return Ok(generation);
                }
                LoopExit::RestartRequested => match self.restart_mode {
                    RestartMode::Reinitialize => {
                        generation += 1;
                        warn!("Restarting supervisor as generation {}", generation);
                    }
                    RestartMode::ReExec => {
                        let err = re_exec();
                        error!("Re-exec failed, continuing in-process: {}", err);
                        generation += 1;
                    }
                },
            }
        }
    }
}

/// Replace the running process with a fresh copy of itself.
///
/// Only returns on failure.
#[cfg(unix)]
fn re_exec() -> FeedwatchError {
    use std::os::unix::process::CommandExt;

    warn!("Re-executing supervisor process");
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return FeedwatchError::Io(e),
    };
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    FeedwatchError::Io(err)
}

#[cfg(not(unix))]
fn re_exec() -> FeedwatchError {
    FeedwatchError::Validation("re_exec restart mode requires a unix platform".to_string())
}
