//! Service lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

/// Service-level state.
///
/// `Idle` until the first connect, `Ready` between requests, `Busy` while at
/// least one request is in flight. Any transport failure moves to
/// `Disconnected`, which only an explicit reconnect leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Idle,
    Ready,
    Busy,
    Disconnected,
}

impl ServiceState {
    /// Whether new requests are accepted
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Ready | ServiceState::Busy)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ServiceState::Idle => "idle",
            ServiceState::Ready => "ready",
            ServiceState::Busy => "busy",
            ServiceState::Disconnected => "disconnected",
        };
        f.write_str(text)
    }
}
