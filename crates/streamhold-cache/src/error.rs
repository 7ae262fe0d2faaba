//! Error types for streamhold-cache.

use std::io;
use thiserror::Error;

/// Result type for streamhold-cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for streamhold-cache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed playlist: missing required tag or bad numeric field.
    #[error("Invalid playlist format: {0}")]
    Format(String),

    /// Fetch or stat of a URL failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A segment buffer could not grow.
    #[error("Failed to allocate {requested} bytes for segment")]
    Allocation { requested: usize },

    /// Directory or chunk file operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    /// Operation not valid in the current state of the cache.
    #[error("Invalid state: {0}")]
    State(String),
}

impl Error {
    /// Create a playlist format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a state error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::format("missing #EXTM3U tag");
        assert_eq!(
            err.to_string(),
            "Invalid playlist format: missing #EXTM3U tag"
        );

        let err = Error::Allocation { requested: 42 };
        assert_eq!(err.to_string(), "Failed to allocate 42 bytes for segment");

        let err = Error::state("wrong unit");
        assert_eq!(err.to_string(), "Invalid state: wrong unit");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Storage(_)));
    }
}
