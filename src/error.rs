use thiserror::Error;

/// Main error type for the feed supervisor
#[derive(Error, Debug)]
pub enum FeedwatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Feed / command construction errors
    #[error("Invalid feed name: {0}")]
    InvalidFeedName(String),

    #[error("Invalid overlay value: {0}")]
    InvalidOverlay(String),

    // Worker lifecycle errors
    #[error("Worker already running for feed: {0}")]
    WorkerAlreadyRunning(String),

    #[error("Failed to spawn worker for {feed}: {source}")]
    Spawn {
        feed: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Signal error: {0}")]
    Signal(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FeedwatchError
pub type Result<T> = std::result::Result<T, FeedwatchError>;

#[cfg(unix)]
impl From<nix::errno::Errno> for FeedwatchError {
    fn from(err: nix::errno::Errno) -> Self {
        FeedwatchError::Signal(err.to_string())
    }
}
