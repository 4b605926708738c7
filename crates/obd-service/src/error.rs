//! Service Error Types

use crate::state::ServiceState;
use obd_protocol::DecodeError;
use obd_session::SessionError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Connect first, or reconnect after a transport failure
    #[error("Service not ready (state: {0})")]
    NotReady(ServiceState),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("PID {0:02X} is not in the catalog")]
    UnknownPid(u8),
}

/// Failure category for user-facing messaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Disconnected,
    Timeout,
    /// The vehicle did not answer or does not support the request
    NoData,
    /// The adapter reported an error
    Adapter,
    /// The reply could not be interpreted
    Decode,
    Unsupported,
}

impl ServiceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ServiceError::NotReady(_) => FailureKind::Disconnected,
            ServiceError::Session(SessionError::Timeout { .. }) => FailureKind::Timeout,
            ServiceError::Session(_) => FailureKind::Disconnected,
            ServiceError::Decode(DecodeError::NoData) => FailureKind::NoData,
            ServiceError::Decode(DecodeError::UnknownCommand | DecodeError::Adapter(_)) => {
                FailureKind::Adapter
            }
            ServiceError::Decode(_) => FailureKind::Decode,
            ServiceError::UnknownPid(_) => FailureKind::Unsupported,
        }
    }

    /// Whether the failure ended the service's connection
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, ServiceError::Session(e) if e.is_transport_failure())
    }
}
