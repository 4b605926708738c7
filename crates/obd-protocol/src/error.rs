//! OBD-II Decode Error Types

use thiserror::Error;

/// Errors produced while interpreting an adapter reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Adapter answered `NO DATA`: the vehicle did not respond or does not support the request
    #[error("No data returned for request")]
    NoData,

    /// Adapter did not understand the command (`?`)
    #[error("Adapter rejected unknown command")]
    UnknownCommand,

    /// Adapter reported an error condition (`CAN ERROR`, `UNABLE TO CONNECT`, ...)
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Response header did not carry the expected mode byte
    #[error("Unexpected response mode: expected {expected:02X}, got {actual:02X}")]
    UnexpectedMode { expected: u8, actual: u8 },

    /// Response answered a different PID than requested
    #[error("PID mismatch: expected {expected:02X}, got {actual:02X}")]
    PidMismatch { expected: u8, actual: u8 },

    /// Fewer data bytes than the decoder needs
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Text could not be interpreted
    #[error("Malformed response: {0}")]
    Malformed(String),
}
