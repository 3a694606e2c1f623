//! Coordination Layer
//!
//! Shutdown handling shared by the supervisor loop and the binary.

pub mod shutdown;

pub use shutdown::{install_signal_handlers, GracefulShutdown, ShutdownPhase, ShutdownSignal};
