pub mod cli;
pub mod config;
pub mod coordination;
pub mod error;
pub mod feed;
pub mod overlay;
pub mod supervisor;

pub use config::{AppConfig, RestartMode, SupervisorSettings};
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use error::{FeedwatchError, Result};
pub use feed::Feed;
pub use overlay::{CommandSpec, OverlayTemplate, ToolCommands};
pub use supervisor::{
    ErrorFlags, FeedProber, Harness, LivenessProbe, LoopExit, ProbeAttempt, ProbeResult,
    Reconciler, Supervisor, ToolProbe, WorkerLauncher, WorkerManager,
};
