//! OBD-II Protocol Implementation
//!
//! Pure, I/O-free decoding for ELM327-compatible OBD-II adapters. Covers
//! ISO 15765-2 multi-frame reassembly, adapter reply classification, DTC
//! and PID decoding, Mode 09 vehicle information, and adapter
//! identification.

mod adapter;
mod dtc;
mod error;
mod isotp;
mod pid;
mod protocol;
mod reply;
mod vehicle;

pub use adapter::{
    firmware_version, AdapterCapabilities, AdapterFamily, AdapterIdentity, DeviceProfile,
    KnownDevice, KNOWN_DEVICES, UNKNOWN_DEVICE,
};
pub use dtc::{decode_dtc_message, DiagnosticTroubleCode, DtcStatus, DtcSystem};
pub use error::DecodeError;
pub use isotp::{
    is_frame_line, parse_hex_line, AssemblyResult, AssemblyState, IsoTpAssembler,
    DEFAULT_MAX_PAYLOAD, ISO_TP_MAX_LENGTH,
};
pub use pid::{decode_pid_message, decode_support_bitmap, ObdPid, PidReading, CATALOG, LIVE_DATA_PIDS};
pub use protocol::{elm, ObdProtocol};
pub use reply::{is_clear_confirmation, parse_reply};
pub use vehicle::{
    decode_mode09_hex, decode_mode09_text, decode_vin, decode_vin_message, VehicleInfo, VinDetails,
    VIN_LENGTH,
};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Pending trouble codes (current or last drive cycle)
    pub const PENDING_DTC: u8 = 0x07;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;

    /// Offset added to a request mode in a positive response (`01` -> `41`)
    pub const RESPONSE_OFFSET: u8 = 0x40;

    /// Positive response byte for a request mode
    pub const fn response(mode: u8) -> u8 {
        mode + RESPONSE_OFFSET
    }
}

/// Mode 09 info types
pub mod info_type {
    /// Vehicle identification number
    pub const VIN: u8 = 0x02;
    /// Calibration ID
    pub const CALIBRATION_ID: u8 = 0x04;
    /// Calibration verification number
    pub const CVN: u8 = 0x06;
    /// ECU name
    pub const ECU_NAME: u8 = 0x0A;
}
