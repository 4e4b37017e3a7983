//! Error types for a3s-shield

use std::fmt;
use thiserror::Error;

/// A failed round-trip to the classification backend
///
/// Cloneable so that every caller coalesced onto the same in-flight
/// request receives the same failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayFailure {
    /// HTTP-style status code when the backend answered with a non-success status
    pub status: Option<u16>,

    /// Human-readable failure reason
    pub reason: String,
}

impl GatewayFailure {
    /// Failure without a backend status (transport error, timeout, rejected request)
    pub fn transport(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
        }
    }

    /// Backend answered with a non-success status
    pub fn status(code: u16, reason: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for GatewayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "backend returned status {}: {}", code, self.reason),
            None => write!(f, "backend request failed: {}", self.reason),
        }
    }
}

impl std::error::Error for GatewayFailure {}

/// Errors that can occur in the moderation pipeline
#[derive(Debug, Error)]
pub enum ShieldError {
    /// Classification backend failure (never cached, never blocks content)
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayFailure),

    /// Request rejected before it reached the backend
    #[error("Invalid classification request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings store read/write failure
    #[error("Settings error: {0}")]
    Settings(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ShieldError {
    /// Whether this error came from the classification backend
    pub fn is_gateway(&self) -> bool {
        matches!(self, ShieldError::Gateway(_))
    }
}

/// Result type alias for shield operations
pub type Result<T> = std::result::Result<T, ShieldError>;
