//! Common error types for Tessera components.

use thiserror::Error;

use crate::protocol::ProtocolVersion;

/// Common errors across Tessera components
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sender speaks a wire protocol older than we accept
    #[error("Incompatible protocol version {declared} (minimum {minimum})")]
    IncompatibleProtocol {
        declared: ProtocolVersion,
        minimum: ProtocolVersion,
    },

    /// Socket or connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Recovery request could not be accepted
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl TesseraError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::IncompatibleProtocol { .. } => 426,
            Self::Transport(_) => 503,
            Self::Codec(_) => 400,
            Self::InvalidInput(_) => 400,
            Self::Recovery(_) => 409,
            Self::Internal(_) => 500,
            Self::Timeout(_) => 504,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<std::io::Error> for TesseraError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
