//! Diagnostic Trouble Codes
//!
//! Standard OBD-II two byte DTC encoding:
//!
//! ```text
//! byte A: [ S S | D D | X X X X ]   S = system (P/C/B/U), D = first digit 0-3
//! byte B: [ X X X X | X X X X ]     X = remaining three hex digits
//! ```

use crate::error::DecodeError;
use crate::mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vehicle system owning a trouble code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DtcSystem {
    Powertrain,
    Chassis,
    Body,
    Network,
}

impl DtcSystem {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => DtcSystem::Powertrain,
            1 => DtcSystem::Chassis,
            2 => DtcSystem::Body,
            _ => DtcSystem::Network,
        }
    }

    /// Letter used in the code text
    pub fn prefix(&self) -> char {
        match self {
            DtcSystem::Powertrain => 'P',
            DtcSystem::Chassis => 'C',
            DtcSystem::Body => 'B',
            DtcSystem::Network => 'U',
        }
    }

    /// Human readable system name
    pub fn display_name(&self) -> &'static str {
        match self {
            DtcSystem::Powertrain => "Powertrain",
            DtcSystem::Chassis => "Chassis",
            DtcSystem::Body => "Body",
            DtcSystem::Network => "Network",
        }
    }
}

/// Whether a code was confirmed (Mode 03) or is still pending (Mode 07)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DtcStatus {
    Stored,
    Pending,
}

impl DtcStatus {
    /// Request mode that reads codes with this status
    pub fn request_mode(&self) -> u8 {
        match self {
            DtcStatus::Stored => mode::READ_DTC,
            DtcStatus::Pending => mode::PENDING_DTC,
        }
    }

    /// Mode byte heading a positive response
    pub fn response_mode(&self) -> u8 {
        mode::response(self.request_mode())
    }
}

/// A decoded trouble code such as `P0300`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagnosticTroubleCode {
    code: String,
    system: DtcSystem,
    status: DtcStatus,
}

impl DiagnosticTroubleCode {
    /// Decode a two byte group. `00 00` is an empty slot and yields `None`.
    pub fn from_bytes(a: u8, b: u8, status: DtcStatus) -> Option<Self> {
        if a == 0 && b == 0 {
            return None;
        }

        let system = DtcSystem::from_bits(a >> 6);
        let code = format!(
            "{}{}{:X}{:02X}",
            system.prefix(),
            (a >> 4) & 0x03,
            a & 0x0F,
            b
        );

        Some(Self { code, system, status })
    }

    /// Parse code text (`P0171`, case-insensitive)
    pub fn parse(text: &str, status: DtcStatus) -> Result<Self, DecodeError> {
        let text = text.trim().to_ascii_uppercase();
        let malformed = || DecodeError::Malformed(format!("invalid DTC '{}'", text));

        let mut chars = text.chars();
        let system = match chars.next() {
            Some('P') => DtcSystem::Powertrain,
            Some('C') => DtcSystem::Chassis,
            Some('B') => DtcSystem::Body,
            Some('U') => DtcSystem::Network,
            _ => return Err(malformed()),
        };
        let digits: Vec<char> = chars.collect();
        if digits.len() != 4
            || !matches!(digits[0], '0'..='3')
            || !digits[1..].iter().all(|c| c.is_ascii_hexdigit())
        {
            return Err(malformed());
        }

        Ok(Self { code: text, system, status })
    }

    /// Code text
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Owning system
    pub fn system(&self) -> DtcSystem {
        self.system
    }

    /// Stored or pending
    pub fn status(&self) -> DtcStatus {
        self.status
    }
}

impl fmt::Display for DiagnosticTroubleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

/// Decode every code in one Mode 03 / 07 response message.
///
/// CAN responses carry a count byte after the mode byte (`43 02 ...`),
/// which leaves an odd number of bytes after the mode; legacy responses
/// are padded to whole pairs.
pub fn decode_dtc_message(
    message: &[u8],
    status: DtcStatus,
) -> Result<Vec<DiagnosticTroubleCode>, DecodeError> {
    let expected = status.response_mode();
    let (&actual, mut rest) = message
        .split_first()
        .ok_or(DecodeError::TooShort { expected: 1, actual: 0 })?;
    if actual != expected {
        return Err(DecodeError::UnexpectedMode { expected, actual });
    }

    if rest.len() % 2 == 1 {
        rest = &rest[1..];
    }

    Ok(rest
        .chunks_exact(2)
        .filter_map(|pair| DiagnosticTroubleCode::from_bytes(pair[0], pair[1], status))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(a: u8, b: u8) -> Option<String> {
        DiagnosticTroubleCode::from_bytes(a, b, DtcStatus::Stored).map(|d| d.code().to_string())
    }

    #[test]
    fn test_decode_known_codes() {
        assert_eq!(code(0x01, 0x71).as_deref(), Some("P0171"));
        assert_eq!(code(0x03, 0x00).as_deref(), Some("P0300"));
        assert_eq!(code(0xC0, 0x01).as_deref(), Some("U0001"));
        assert_eq!(code(0x41, 0x23).as_deref(), Some("C0123"));
        assert_eq!(code(0x9A, 0xBC).as_deref(), Some("B1ABC"));
        assert_eq!(code(0x00, 0x00), None);
    }

    #[test]
    fn test_system_classification() {
        let dtc = DiagnosticTroubleCode::from_bytes(0xC0, 0x01, DtcStatus::Pending).unwrap();
        assert_eq!(dtc.system(), DtcSystem::Network);
        assert_eq!(dtc.status(), DtcStatus::Pending);
        assert_eq!(dtc.to_string(), "U0001");
    }

    #[test]
    fn test_decode_can_message_with_count() {
        let dtcs = decode_dtc_message(&[0x43, 0x02, 0x03, 0x00, 0x01, 0x71], DtcStatus::Stored)
            .unwrap();
        let codes: Vec<_> = dtcs.iter().map(|d| d.code()).collect();
        assert_eq!(codes, vec!["P0300", "P0171"]);
    }

    #[test]
    fn test_decode_legacy_padded_message() {
        let dtcs = decode_dtc_message(
            &[0x47, 0x01, 0x71, 0x00, 0x00, 0x00, 0x00],
            DtcStatus::Pending,
        )
        .unwrap();
        assert_eq!(dtcs.len(), 1);
        assert_eq!(dtcs[0].code(), "P0171");
    }

    #[test]
    fn test_decode_no_codes() {
        assert!(decode_dtc_message(&[0x43, 0x00], DtcStatus::Stored).unwrap().is_empty());
    }

    #[test]
    fn test_decode_wrong_mode() {
        let err = decode_dtc_message(&[0x47, 0x01, 0x71], DtcStatus::Stored).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedMode { expected: 0x43, actual: 0x47 });
    }

    #[test]
    fn test_parse_text() {
        let dtc = DiagnosticTroubleCode::parse("p0420", DtcStatus::Stored).unwrap();
        assert_eq!(dtc.code(), "P0420");
        assert_eq!(dtc, DiagnosticTroubleCode::from_bytes(0x04, 0x20, DtcStatus::Stored).unwrap());
        assert!(DiagnosticTroubleCode::parse("P4000", DtcStatus::Stored).is_err());
        assert!(DiagnosticTroubleCode::parse("X0100", DtcStatus::Stored).is_err());
        assert!(DiagnosticTroubleCode::parse("P01", DtcStatus::Stored).is_err());
    }
}
