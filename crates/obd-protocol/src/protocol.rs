//! ELM327 Protocol Selection and AT Commands

use serde::{Deserialize, Serialize};

/// ELM327 AT command strings
pub mod elm {
    /// Reset all
    pub const RESET: &str = "ATZ";
    /// Restore defaults
    pub const DEFAULTS: &str = "ATD";
    /// Echo off
    pub const ECHO_OFF: &str = "ATE0";
    /// Linefeeds off
    pub const LINEFEEDS_OFF: &str = "ATL0";
    /// Spaces between bytes on
    pub const SPACES_ON: &str = "ATS1";
    /// CAN id headers on
    pub const HEADERS_ON: &str = "ATH1";
    /// Headers off
    pub const HEADERS_OFF: &str = "ATH0";
    /// Adaptive timing, normal
    pub const ADAPTIVE_TIMING: &str = "ATAT1";
    /// Describe the active protocol
    pub const DESCRIBE_PROTOCOL: &str = "ATDP";
    /// Adapter identification
    pub const IDENTIFY: &str = "ATI";
    /// Device description
    pub const DEVICE_DESCRIPTION: &str = "AT@1";
    /// STN firmware identification; ELM chips answer `?`
    pub const STN_IDENTIFY: &str = "STI";
    /// STN device identification
    pub const STN_DEVICE: &str = "STDI";
    /// STN manufacturer
    pub const STN_MANUFACTURER: &str = "STMFR";
    /// Read battery voltage
    pub const READ_VOLTAGE: &str = "ATRV";

    /// Prompt that ends every adapter response
    pub const PROMPT: char = '>';
    /// Command line terminator
    pub const TERMINATOR: &str = "\r";
}

/// OBD-II protocols the adapter is asked to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Can29bit250,
}

impl ObdProtocol {
    /// Get the ELM327 AT command selecting this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::Can11bit500 => "ATSP6",
            ObdProtocol::Can29bit500 => "ATSP7",
            ObdProtocol::Can11bit250 => "ATSP8",
            ObdProtocol::Can29bit250 => "ATSP9",
        }
    }

    /// Width in hex digits of the CAN id the adapter prints with headers on.
    /// `None` while auto detecting.
    pub fn header_digits(&self) -> Option<usize> {
        match self {
            ObdProtocol::Auto => None,
            ObdProtocol::Can11bit500 | ObdProtocol::Can11bit250 => Some(3),
            ObdProtocol::Can29bit500 | ObdProtocol::Can29bit250 => Some(8),
        }
    }
}
