//! Error types shared by every TgFleet crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Rejected input (nil task, empty targets, unknown task type).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Risk-control admission denial.
    #[error("Denied: {0}")]
    Denied(String),

    /// Executor resolution or strategy failure.
    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Error reported by the upstream provider (Telegram RPC errors, flood waits).
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FleetError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_keeps_provider_text() {
        let err = FleetError::Provider("FLOOD_WAIT_30".into());
        assert_eq!(err.to_string(), "Provider error: FLOOD_WAIT_30");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FleetError = io.into();
        assert!(matches!(err, FleetError::Io(_)));
    }
}
