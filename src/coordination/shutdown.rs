//! Shutdown Coordination
//!
//! Turns OS signals into a single shutdown request that the supervisor loop
//! observes between steps and while sleeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT): workers get their grace period
    Graceful,
    /// Urgent shutdown (SIGQUIT): workers are killed without waiting
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Terminating worker processes
    StoppingWorkers,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingWorkers => write!(f, "stopping_workers"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    shutdown_requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
    phase_tx: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            shutdown_requested: AtomicBool::new(false),
            signal_tx,
            phase_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// The signal that requested shutdown, if any
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.signal_tx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    /// Resolve once shutdown has been requested, including before this call
    pub async fn wait(&self) -> ShutdownSignal {
        let mut rx = self.signal_tx.subscribe();
        // Sender lives in self, so the channel cannot close while we borrow it
        let _ = rx.wait_for(|s| s.is_some()).await;
        self.signal().unwrap_or(ShutdownSignal::Graceful)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    pub fn set_phase(&self, phase: ShutdownPhase) {
        self.phase_tx.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers that feed `shutdown`
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ];

        for (kind, name, kind_signal) in handlers {
            let mut stream = signal(kind)?;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                // A second signal of the same kind is logged as a duplicate
                while stream.recv().await.is_some() {
                    info!("Received {}", name);
                    shutdown.request_shutdown(kind_signal);
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                shutdown.request_shutdown(ShutdownSignal::Graceful);
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::Urgent.to_string(), "urgent");
        assert_eq!(ShutdownPhase::StoppingWorkers.to_string(), "stopping_workers");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::new();

        assert!(!shutdown.is_shutdown_requested());
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Running);

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());

        // Duplicate request should be ignored
        shutdown.request_shutdown(ShutdownSignal::Urgent);
        assert_eq!(shutdown.signal(), Some(ShutdownSignal::Graceful));
    }

    #[tokio::test]
    async fn test_wait_sees_earlier_request() {
        let shutdown = GracefulShutdown::new();
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        let signal = tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
        assert_eq!(signal, ShutdownSignal::Urgent);
    }

    #[test]
    fn test_wait_pending_until_request() {
        let shutdown = GracefulShutdown::new();
        let mut wait = tokio_test::task::spawn(shutdown.wait());
        tokio_test::assert_pending!(wait.poll());

        shutdown.request_shutdown(ShutdownSignal::Urgent);
        assert!(wait.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(wait.poll()),
            ShutdownSignal::Urgent
        );
    }

    #[tokio::test]
    async fn test_wait_wakes_on_request() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let signal = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal, ShutdownSignal::Graceful);
    }
}
