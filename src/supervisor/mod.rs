//! Feed Supervision
//!
//! This module keeps one transcode worker running per live feed:
//! - Prober for feed liveness with failure tolerance
//! - Worker manager for process start/stop and the registry
//! - Output scanner for critical errors in worker stderr
//! - Reconciler for restarts and escalation
//! - Loop and harness driving it all

pub mod harness;
pub mod prober;
pub mod reconciler;
pub mod registry;
pub mod runner;
pub mod scanner;
pub mod worker;

pub use harness::Harness;
pub use prober::{FeedProber, LivenessProbe, ProbeAttempt, ProbeResult, ToolProbe};
pub use reconciler::{ReconcileOutcome, Reconciler, RestartReason};
pub use registry::{ErrorFlags, ProcessRegistry};
pub use runner::{CycleReport, LoopExit, Supervisor};
pub use scanner::{critical_match, ScanSummary, CRITICAL_PATTERNS};
pub use worker::{StopOutcome, WorkerHandle, WorkerLauncher, WorkerManager};
