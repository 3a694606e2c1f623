//! Feed liveness probing
//!
//! A probe is a short, time-bounded read of the feed's input by the tool.
//! [`FeedProber`] keeps a consecutive-failure counter per feed and only
//! declares a feed gone once the counter reaches the configured threshold.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::feed::Feed;
use crate::overlay::ToolCommands;

/// Text the tool prints once it has opened an input stream
const INPUT_OPENED_MARKER: &str = "Input #0";

/// Outcome of a single probe invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeAttempt {
    Success,
    Failed { reason: String },
}

impl ProbeAttempt {
    pub fn failed(reason: impl Into<String>) -> Self {
        ProbeAttempt::Failed {
            reason: reason.into(),
        }
    }
}

/// A single liveness check against a feed
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn check(&self, feed: &Feed) -> ProbeAttempt;
}

/// Probes a feed by running the tool against its input address
pub struct ToolProbe {
    commands: ToolCommands,
    timeout: Duration,
}

impl ToolProbe {
    pub fn new(commands: ToolCommands, timeout: Duration) -> Self {
        Self { commands, timeout }
    }
}

#[async_trait]
impl LivenessProbe for ToolProbe {
    async fn check(&self, feed: &Feed) -> ProbeAttempt {
        let spec = self.commands.probe(feed);
        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ProbeAttempt::failed(format!("probe could not run: {}", e)),
            Err(_) => {
                return ProbeAttempt::failed(format!("probe timed out after {:?}", self.timeout))
            }
        };

        probe_verdict(output.status, &output.stderr)
    }
}

/// Success on a clean exit, or when the tool reports an opened input
fn probe_verdict(status: ExitStatus, stderr: &[u8]) -> ProbeAttempt {
    let stderr = String::from_utf8_lossy(stderr);
    if status.success() || stderr.contains(INPUT_OPENED_MARKER) {
        return ProbeAttempt::Success;
    }

    let detail = stderr.trim();
    if detail.is_empty() {
        ProbeAttempt::failed(format!("probe exited with {}", status))
    } else {
        ProbeAttempt::failed(format!("probe exited with {}: {}", status, detail))
    }
}

/// Liveness verdict for one feed in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub feed: String,
    /// Whether this cycle's probe succeeded
    pub healthy: bool,
    pub consecutive_failures: u32,
    /// Whether the feed should have a worker
    pub live: bool,
}

/// Probe with per-feed failure tolerance
pub struct FeedProber {
    probe: Arc<dyn LivenessProbe>,
    failures: HashMap<String, u32>,
    failure_threshold: u32,
}

impl FeedProber {
    pub fn new(probe: Arc<dyn LivenessProbe>, failure_threshold: u32) -> Self {
        Self {
            probe,
            failures: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn consecutive_failures(&self, feed: &str) -> u32 {
        self.failures.get(feed).copied().unwrap_or(0)
    }

    /// Probe `feed` and update its failure counter
    pub async fn probe(&mut self, feed: &Feed) -> ProbeResult {
        let attempt = self.probe.check(feed).await;
        let counter = self.failures.entry(feed.name().to_string()).or_insert(0);

        let healthy = match attempt {
            ProbeAttempt::Success => {
                *counter = 0;
                debug!("Feed {} is transmitting", feed);
                true
            }
            ProbeAttempt::Failed { reason } => {
                *counter += 1;
                warn!(
                    "Feed {} is not transmitting (failure #{}): {}",
                    feed, *counter, reason
                );
                false
            }
        };

        ProbeResult {
            feed: feed.name().to_string(),
            healthy,
            consecutive_failures: *counter,
            live: *counter < self.failure_threshold,
        }
    }
}
