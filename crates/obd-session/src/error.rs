//! Session Error Types

use std::time::Duration;
use thiserror::Error;

/// Failures of the raw byte link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Nothing arrived before the deadline
    #[error("No adapter output within {0:?}")]
    Timeout(Duration),

    /// The stream ended or the link was shut down
    #[error("Link closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while establishing a link
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Target {target} unreachable: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connecting to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    /// Serial device missing, unpaired or not permitted
    #[error("Serial device {device} unavailable: {source}")]
    Serial {
        device: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Session already connected")]
    AlreadyConnected,
}

/// Failures of a command exchange
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Adapter not connected")]
    NotConnected,

    /// No prompt (or assembled message) before the command's deadline
    #[error("No response to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// Read or write failed after a successful connect
    #[error("Link lost: {0}")]
    LinkLost(LinkError),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl SessionError {
    /// Whether the failure means the link can no longer be trusted
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, SessionError::Timeout { .. } | SessionError::LinkLost(_))
    }
}
