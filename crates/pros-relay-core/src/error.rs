use thiserror::Error;

/// Core error types for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to spawn child process: {0}")]
    SpawnFailed(String),

    #[error("PTY allocation failed: {0}")]
    PtyAllocation(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        RelayError::SpawnFailed(msg.into())
    }

    pub fn transport_error(msg: impl Into<String>) -> Self {
        RelayError::TransportError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        RelayError::Timeout(msg.into())
    }

    /// Check if this error should trigger the pipe fallback during start.
    ///
    /// Every PTY-side start failure does: a host with a broken PTY layer can
    /// still stream through pipes, and a missing executable fails the pipe
    /// attempt just as quickly.
    pub fn is_fallback_candidate(&self) -> bool {
        !matches!(self, RelayError::ConfigurationError(_) | RelayError::Cancelled)
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RelayError::ConfigurationError(_) | RelayError::Cancelled
        )
    }
}
