//! Mode 09 vehicle information and VIN decoding

use crate::error::DecodeError;
use crate::mode;
use serde::{Deserialize, Serialize};

/// Length of a vehicle identification number
pub const VIN_LENGTH: usize = 17;

/// Vehicle identification gathered from Mode 09
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vin: Option<String>,
    pub calibration_id: Option<String>,
    /// Calibration verification number, hex encoded
    pub cvn: Option<String>,
    pub ecu_name: Option<String>,
}

impl VehicleInfo {
    /// Decoded VIN, when one was read and is well formed
    pub fn vin_details(&self) -> Option<VinDetails> {
        self.vin.as_deref().and_then(decode_vin)
    }
}

/// Table-driven breakdown of a VIN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VinDetails {
    pub manufacturer: Option<String>,
    pub model_year: Option<u16>,
    pub plant_code: char,
    pub serial_number: String,
}

/// Strip the `49 <info type> <count>` header from a Mode 09 message
fn mode09_data(message: &[u8], info_type: u8) -> Result<&[u8], DecodeError> {
    let expected = mode::response(mode::VEHICLE_INFO);
    match message {
        [m, ..] if *m != expected => Err(DecodeError::UnexpectedMode {
            expected,
            actual: *m,
        }),
        [_, t, ..] if *t != info_type => Err(DecodeError::PidMismatch {
            expected: info_type,
            actual: *t,
        }),
        [_, _, _, data @ ..] => Ok(data),
        _ => Err(DecodeError::TooShort {
            expected: 3,
            actual: message.len(),
        }),
    }
}

/// Decode a text info type (VIN, calibration ID, ECU name).
///
/// Padding and non-printable bytes are dropped.
pub fn decode_mode09_text(message: &[u8], info_type: u8) -> Result<String, DecodeError> {
    let data = mode09_data(message, info_type)?;
    let text: String = data
        .iter()
        .map(|&b| b as char)
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Malformed(format!("empty info type {:02X}", info_type)));
    }
    Ok(text.to_string())
}

/// Decode a binary info type (CVN) as upper-case hex
pub fn decode_mode09_hex(message: &[u8], info_type: u8) -> Result<String, DecodeError> {
    let data = mode09_data(message, info_type)?;
    if data.is_empty() {
        return Err(DecodeError::Malformed(format!("empty info type {:02X}", info_type)));
    }
    Ok(data.iter().map(|b| format!("{:02X}", b)).collect())
}

/// Decode a VIN message (`49 02 01 ...`) keeping the first 17 alphanumerics
pub fn decode_vin_message(message: &[u8]) -> Result<String, DecodeError> {
    let data = mode09_data(message, crate::info_type::VIN)?;
    let vin: String = data
        .iter()
        .map(|&b| b as char)
        .filter(|c| c.is_ascii_alphanumeric())
        .take(VIN_LENGTH)
        .collect();
    if vin.len() != VIN_LENGTH {
        return Err(DecodeError::Malformed(format!("VIN '{}' is not {} characters", vin, VIN_LENGTH)));
    }
    Ok(vin)
}

const MANUFACTURERS: &[(&[&str], &str)] = &[
    (&["1G", "2G", "3G"], "General Motors"),
    (&["1F", "2F", "3F"], "Ford"),
    (&["1C", "2C", "3C"], "Chrysler"),
    (&["1H", "2H"], "Honda"),
    (&["1N", "5N"], "Nissan"),
    (&["JT"], "Toyota"),
    (&["JH"], "Honda (Japan)"),
    (&["JN"], "Nissan (Japan)"),
    (&["JM"], "Mazda"),
    (&["KM", "KN"], "Hyundai/Kia"),
    (&["WA", "WV", "WF"], "Volkswagen/Audi"),
    (&["WB"], "BMW"),
    (&["WD"], "Mercedes-Benz"),
    (&["ZF", "ZA"], "Fiat/Alfa Romeo"),
    (&["5Y", "4T"], "Toyota (USA)"),
    (&["5T"], "Toyota Trucks"),
    (&["19", "2T"], "Toyota/Lexus"),
];

fn model_year(code: char) -> Option<u16> {
    // I, O, Q, U and Z are never used as year codes
    const LETTERS: &str = "ABCDEFGHJKLMNPRST";
    match code {
        '1'..='9' => Some(2000 + code as u16 - '0' as u16),
        _ => LETTERS.find(code).map(|i| 2010 + i as u16),
    }
}

/// Break a 17 character VIN into manufacturer, model year, plant and serial
pub fn decode_vin(vin: &str) -> Option<VinDetails> {
    let vin = vin.trim().to_ascii_uppercase();
    if vin.len() != VIN_LENGTH || !vin.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let manufacturer = MANUFACTURERS
        .iter()
        .find(|(prefixes, _)| prefixes.iter().any(|p| vin.starts_with(p)))
        .map(|(_, name)| name.to_string());
    let chars: Vec<char> = vin.chars().collect();

    Some(VinDetails {
        manufacturer,
        model_year: model_year(chars[9]),
        plant_code: chars[10],
        serial_number: vin[11..].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info_type;

    fn vin_message() -> Vec<u8> {
        let mut message = vec![0x49, 0x02, 0x01];
        message.extend_from_slice(b"1G1JC5444R7252367");
        message
    }

    #[test]
    fn test_vin_message() {
        assert_eq!(decode_vin_message(&vin_message()).unwrap(), "1G1JC5444R7252367");
    }

    #[test]
    fn test_vin_with_padding() {
        let mut message = vec![0x49, 0x02, 0x01, 0x00, 0x00, 0x00];
        message.extend_from_slice(b"WBA3A5C55CF256985");
        assert_eq!(decode_vin_message(&message).unwrap(), "WBA3A5C55CF256985");
    }

    #[test]
    fn test_vin_too_short() {
        let message = [0x49, 0x02, 0x01, b'1', b'G', b'1'];
        assert!(matches!(decode_vin_message(&message), Err(DecodeError::Malformed(_))));
        assert!(decode_vin_message(&[0x49]).is_err());
        assert!(matches!(
            decode_vin_message(&[0x49, 0x04, 0x01, b'X']),
            Err(DecodeError::PidMismatch { .. })
        ));
    }

    #[test]
    fn test_text_and_hex_info() {
        let mut message = vec![0x49, 0x0A, 0x01];
        message.extend_from_slice(b"ECM\0-EngineControl\0\0");
        assert_eq!(
            decode_mode09_text(&message, info_type::ECU_NAME).unwrap(),
            "ECM-EngineControl"
        );

        let cvn = [0x49, 0x06, 0x01, 0x17, 0x91, 0xBC, 0x82];
        assert_eq!(decode_mode09_hex(&cvn, info_type::CVN).unwrap(), "1791BC82");
        assert!(decode_mode09_hex(&[0x49, 0x06, 0x01], info_type::CVN).is_err());
    }

    #[test]
    fn test_decode_vin() {
        let details = decode_vin("1G1JC5444R7252367").unwrap();
        assert_eq!(details.manufacturer.as_deref(), Some("General Motors"));
        assert_eq!(details.model_year, Some(2024));
        assert_eq!(details.plant_code, '7');
        assert_eq!(details.serial_number, "252367");

        let details = decode_vin("WBA3A5C55CF256985").unwrap();
        assert_eq!(details.manufacturer.as_deref(), Some("BMW"));
        assert_eq!(details.model_year, Some(2012));

        assert_eq!(decode_vin("XXX3A5C55Z1256985").unwrap().manufacturer, None);
        assert_eq!(decode_vin("XXX3A5C555F256985").unwrap().model_year, Some(2005));
        assert!(decode_vin("SHORT").is_none());
    }

    #[test]
    fn test_vehicle_info_details() {
        let info = VehicleInfo {
            vin: Some("JTDKB20U793512345".to_string()),
            ..Default::default()
        };
        let details = info.vin_details().unwrap();
        assert_eq!(details.manufacturer.as_deref(), Some("Toyota"));
        assert_eq!(details.model_year, Some(2009));
        assert!(VehicleInfo::default().vin_details().is_none());
    }
}
