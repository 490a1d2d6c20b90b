//! Error types for the gena-device crate.

use thiserror::Error;

/// Errors surfaced by publisher-side operations.
///
/// Inbound request handling never raises these to the application; every
/// failure there ends in an HTTP error response to the peer. These cover the
/// application-facing entry points (registration, notify).
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device handle does not name a registered device
    #[error("Invalid device handle")]
    InvalidHandle,

    /// No such service under the given device
    #[error("Invalid service: {udn}/{service_id}")]
    InvalidService {
        /// Device UDN
        udn: String,
        /// Service identifier
        service_id: String,
    },

    /// No subscription with the given id, or it is not in the expected state
    #[error("Invalid subscription id: {0}")]
    InvalidSid(String),

    /// The event server could not be started
    #[error("Event server error: {0}")]
    ServerError(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Transport-level failure while delivering one NOTIFY.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect to the delivery URL
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The request was sent but no usable response came back in time
    #[error("Send/receive failed: {0}")]
    SendRecv(String),
}

/// Convenience type alias for Results using DeviceError.
pub type Result<T> = std::result::Result<T, DeviceError>;
