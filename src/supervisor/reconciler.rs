//! Worker health reconciliation
//!
//! Each pass restarts workers that exited or raised their error flag and
//! tracks a global streak of restart events. When the streak reaches the
//! escalation threshold the pass asks for a full supervisor restart; acting
//! on that is left to the caller.

use std::time::Duration;
use tracing::{error, info, warn};

use super::worker::WorkerManager;
use crate::feed::Feed;

/// Why a worker is being restarted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    Exited(String),
    CriticalOutput,
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::Exited(status) => write!(f, "exited unexpectedly ({})", status),
            RestartReason::CriticalOutput => write!(f, "reported critical errors"),
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub restarted: Vec<String>,
    /// Restart streak after the pass
    pub consecutive_restarts: u32,
    pub escalate: bool,
}

pub struct Reconciler {
    consecutive_restarts: u32,
    escalation_threshold: u32,
    restart_cooldown: Duration,
}

impl Reconciler {
    pub fn new(escalation_threshold: u32, restart_cooldown: Duration) -> Self {
        Self {
            consecutive_restarts: 0,
            escalation_threshold: escalation_threshold.max(1),
            restart_cooldown,
        }
    }

    pub fn consecutive_restarts(&self) -> u32 {
        self.consecutive_restarts
    }

    /// Inspect every running worker once, in configured feed order,
    /// restarting unhealthy ones.
    ///
    /// The streak is global: a healthy feed later in the pass clears it even
    /// if an earlier feed was restarted.
    pub async fn reconcile(
        &mut self,
        feeds: &[Feed],
        workers: &mut WorkerManager,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for feed in feeds {
            let name = feed.name();
            if !workers.is_running(name) {
                continue;
            }

            let reason = match workers.exit_status(name) {
                Ok(Some(status)) => Some(RestartReason::Exited(status.to_string())),
                Ok(None) => None,
                Err(e) => Some(RestartReason::Exited(format!("status unavailable: {}", e))),
            };
            // Checked even after an exit so a stale flag never survives the pass
            let flagged = workers.flags().take(name).await;
            let reason = reason.or(flagged.then_some(RestartReason::CriticalOutput));

            let Some(reason) = reason else {
                self.consecutive_restarts = 0;
                continue;
            };

            match &reason {
                RestartReason::Exited(_) => warn!("Worker for {} {}", name, reason),
                RestartReason::CriticalOutput => {
                    error!("Worker for {} {}, restarting", name, reason)
                }
            }

            workers.stop(name).await;
            tokio::time::sleep(self.restart_cooldown).await;

            match workers.start(feed).await {
                Ok(()) => info!("Restarted worker for {}", name),
                Err(e) => error!("Failed to restart worker for {}: {}", name, e),
            }

            self.consecutive_restarts += 1;
            outcome.restarted.push(name.to_string());
        }

        outcome.consecutive_restarts = self.consecutive_restarts;
        if self.consecutive_restarts >= self.escalation_threshold {
            error!(
                "{} consecutive restart events (limit {}), requesting supervisor restart",
                self.consecutive_restarts, self.escalation_threshold
            );
            outcome.escalate = true;
        }
        outcome
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::overlay::CommandSpec;
    use crate::supervisor::registry::ErrorFlags;
    use crate::supervisor::worker::WorkerLauncher;
    use std::sync::Arc;

    struct ShellLauncher;

    impl WorkerLauncher for ShellLauncher {
        fn command(&self, feed: &Feed) -> Result<CommandSpec> {
            let script = if feed.name() == "crashy" {
                "exit 3"
            } else {
                "exec sleep 30"
            };
            Ok(CommandSpec {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
            })
        }
    }

    fn setup(names: &[&str]) -> (Vec<Feed>, WorkerManager) {
        let feeds = names.iter().map(|n| Feed::new(n).unwrap()).collect();
        let workers = WorkerManager::new(
            Arc::new(ShellLauncher),
            ErrorFlags::new(),
            Duration::from_millis(300),
        );
        (feeds, workers)
    }

    #[tokio::test]
    async fn test_healthy_pass_resets_streak() {
        let (feeds, mut workers) = setup(&["vant1"]);
        workers.start(&feeds[0]).await.unwrap();
        let mut reconciler = Reconciler::new(2, Duration::from_millis(10));

        let outcome = reconciler.reconcile(&feeds, &mut workers).await;
        assert!(outcome.restarted.is_empty());
        assert_eq!(outcome.consecutive_restarts, 0);
        assert!(!outcome.escalate);

        workers.stop_all(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn test_flagged_worker_restarted_and_flag_cleared() {
        let (feeds, mut workers) = setup(&["vant3"]);
        workers.start(&feeds[0]).await.unwrap();
        let old_pid = workers.pid("vant3");
        workers.flags().raise("vant3").await;

        let mut reconciler = Reconciler::new(5, Duration::from_millis(10));
        let outcome = reconciler.reconcile(&feeds, &mut workers).await;

        assert_eq!(outcome.restarted, vec!["vant3".to_string()]);
        assert_eq!(outcome.consecutive_restarts, 1);
        assert!(!outcome.escalate);
        assert!(workers.is_running("vant3"));
        assert_ne!(workers.pid("vant3"), old_pid);
        assert!(!workers.flags().is_set("vant3").await);

        workers.stop_all(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn test_exited_worker_triggers_escalation() {
        let (feeds, mut workers) = setup(&["crashy"]);
        workers.start(&feeds[0]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut reconciler = Reconciler::new(1, Duration::from_millis(10));
        let outcome = reconciler.reconcile(&feeds, &mut workers).await;

        assert_eq!(outcome.restarted, vec!["crashy".to_string()]);
        assert!(outcome.escalate);

        workers.stop_all(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn test_streak_is_global() {
        // The healthy feed after "crashy" clears its restart
        let (feeds, mut workers) = setup(&["crashy", "vant1"]);
        for feed in &feeds {
            workers.start(feed).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut reconciler = Reconciler::new(1, Duration::from_millis(10));
        let outcome = reconciler.reconcile(&feeds, &mut workers).await;

        assert_eq!(outcome.restarted, vec!["crashy".to_string()]);
        assert_eq!(outcome.consecutive_restarts, 0);
        assert!(!outcome.escalate);

        workers.stop_all(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn test_pass_follows_configured_feed_order() {
        // Configured after the healthy feed, so nothing clears its restart
        let (feeds, mut workers) = setup(&["vant1", "crashy"]);
        for feed in &feeds {
            workers.start(feed).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut reconciler = Reconciler::new(1, Duration::from_millis(10));
        let outcome = reconciler.reconcile(&feeds, &mut workers).await;

        assert_eq!(outcome.restarted, vec!["crashy".to_string()]);
        assert_eq!(outcome.consecutive_restarts, 1);
        assert_eq!(reconciler.consecutive_restarts(), 1);
        assert!(outcome.escalate);

        workers.stop_all(Duration::from_millis(300)).await;
    }
}
