//! Error types for the gena-ctrlpt crate.

use thiserror::Error;

/// Errors surfaced by control-point operations.
#[derive(Debug, Error)]
pub enum CtrlptError {
    /// The publisher refused the subscription or renewal
    #[error("Publisher refused with HTTP status {0}")]
    Refused(u16),

    /// The publisher's reply was missing or malformed
    #[error("Malformed publisher response: {0}")]
    BadResponse(String),

    /// The HTTP request itself failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The event URL could not be parsed
    #[error("Invalid event URL: {0}")]
    InvalidUrl(String),

    /// No subscription with the given id
    #[error("Invalid subscription id: {0}")]
    InvalidSid(String),

    /// The NOTIFY listener could not be started
    #[error("Listener error: {0}")]
    ServerError(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Convenience type alias for Results using CtrlptError.
pub type Result<T> = std::result::Result<T, CtrlptError>;
