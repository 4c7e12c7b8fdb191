//! Workflow provider error types

use thiserror::Error;

/// Failure of a single provider call.
///
/// The bridge never retries; the orchestrator decides what to do with each kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Transport failure, timeout, 5xx, or a response missing required data
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The provider understood the request and refused it (4xx)
    #[error("provider rejected request (HTTP {status}): {message}")]
    ProviderRejected { status: u16, message: String },
}

impl BridgeError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable(message.into())
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::ProviderRejected {
            status,
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            400..=499 => Self::rejected(status, body),
            _ => Self::unavailable(format!("HTTP {status}: {body}")),
        }
    }

    /// Classify a transport-level failure
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::unavailable(format!("Request timeout: {err}"))
        } else if err.is_connect() {
            Self::unavailable(format!("Connection failed: {err}"))
        } else {
            Self::unavailable(format!("Request failed: {err}"))
        }
    }
}
