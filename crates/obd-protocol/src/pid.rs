//! OBD-II PID Definitions and Response Parsing
//!
//! Static catalog of the standard Mode 01 Parameter IDs with their decoding
//! formulas (SAE J1979 / ISO 15031-5). `A`, `B`, `C`, `D` below refer to
//! the data bytes following the `41 <pid>` response header.

use crate::error::DecodeError;
use crate::mode;
use serde::{Deserialize, Serialize};

/// A Mode 01 PID catalog entry
#[derive(Debug, Clone, Copy)]
pub struct ObdPid {
    /// PID byte
    pub code: u8,
    /// Short identifier, e.g. `ENGINE_RPM`
    pub name: &'static str,
    /// Human description
    pub description: &'static str,
    /// Display unit
    pub unit: &'static str,
    /// Data bytes the formula needs
    pub expected_bytes: usize,
    formula: fn(&[u8]) -> f64,
}

impl PartialEq for ObdPid {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for ObdPid {}

impl ObdPid {
    const fn new(
        code: u8,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
        expected_bytes: usize,
        formula: fn(&[u8]) -> f64,
    ) -> Self {
        Self {
            code,
            name,
            description,
            unit,
            expected_bytes,
            formula,
        }
    }

    /// Find a catalog entry by PID byte
    pub fn lookup(code: u8) -> Option<&'static ObdPid> {
        CATALOG.iter().find(|pid| pid.code == code)
    }

    /// Find a catalog entry by name (`ENGINE_RPM`) or hex code (`0C`)
    pub fn find(key: &str) -> Option<&'static ObdPid> {
        let key = key.trim();
        CATALOG
            .iter()
            .find(|pid| pid.name.eq_ignore_ascii_case(key))
            .or_else(|| u8::from_str_radix(key, 16).ok().and_then(Self::lookup))
    }

    /// Adapter command text (`010C`)
    pub fn command(&self) -> String {
        format!("{:02X}{:02X}", mode::CURRENT_DATA, self.code)
    }

    /// Apply the formula; `None` when fewer bytes than the formula needs
    pub fn decode(&self, data: &[u8]) -> Option<f64> {
        if data.len() < self.expected_bytes {
            return None;
        }
        Some((self.formula)(data))
    }

    /// Format a value with its unit: integral values without decimals
    pub fn format_value(&self, value: f64) -> String {
        if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{} {}", value as i64, self.unit)
        } else {
            format!("{:.2} {}", value, self.unit)
        }
    }
}

/// Decoded Mode 01 reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidReading {
    /// The PID that was queried
    pub pid: u8,
    /// Decoded value
    pub value: f64,
    /// Value with unit, ready for display
    pub formatted: String,
    /// Data bytes after the response header
    pub raw_bytes: Vec<u8>,
}

/// Decode one `41 <pid> <data..>` message for `pid`
pub fn decode_pid_message(pid: &ObdPid, message: &[u8]) -> Result<PidReading, DecodeError> {
    let expected_mode = mode::response(mode::CURRENT_DATA);
    match message {
        [mode_byte, ..] if *mode_byte != expected_mode => Err(DecodeError::UnexpectedMode {
            expected: expected_mode,
            actual: *mode_byte,
        }),
        [_, pid_byte, ..] if *pid_byte != pid.code => Err(DecodeError::PidMismatch {
            expected: pid.code,
            actual: *pid_byte,
        }),
        [_, _, data @ ..] => {
            let value = pid.decode(data).ok_or(DecodeError::TooShort {
                expected: pid.expected_bytes,
                actual: data.len(),
            })?;
            Ok(PidReading {
                pid: pid.code,
                value,
                formatted: pid.format_value(value),
                raw_bytes: data.to_vec(),
            })
        }
        _ => Err(DecodeError::TooShort {
            expected: 2 + pid.expected_bytes,
            actual: message.len(),
        }),
    }
}

/// Expand a 4 byte support bitmap (`41 00 BE 3F A8 13`) into PID bytes.
///
/// `base` is the PID that was queried (`0x00`, `0x20`, ...); bit 31 stands
/// for `base + 1`.
pub fn decode_support_bitmap(data: &[u8], base: u8) -> Vec<u8> {
    if data.len() < 4 {
        return Vec::new();
    }
    let bitmap = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    (0..32u8)
        .filter(|bit| bitmap & (1 << (31 - bit)) != 0)
        .filter_map(|bit| base.checked_add(bit + 1))
        .collect()
}

/// PIDs polled by the live data view
pub const LIVE_DATA_PIDS: [u8; 5] = [0x0C, 0x0D, 0x05, 0x11, 0x04];

fn a(bytes: &[u8]) -> f64 {
    bytes[0] as f64
}

fn ab(bytes: &[u8]) -> f64 {
    u16::from_be_bytes([bytes[0], bytes[1]]) as f64
}

fn cd(bytes: &[u8]) -> f64 {
    u16::from_be_bytes([bytes[2], bytes[3]]) as f64
}

fn offset40(bytes: &[u8]) -> f64 {
    a(bytes) - 40.0
}

fn percent(bytes: &[u8]) -> f64 {
    a(bytes) * 100.0 / 255.0
}

fn signed_percent(bytes: &[u8]) -> f64 {
    (a(bytes) - 128.0) * 100.0 / 128.0
}

fn bitmask(bytes: &[u8]) -> f64 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
}

fn o2_voltage(bytes: &[u8]) -> f64 {
    a(bytes) / 200.0
}

fn lambda(bytes: &[u8]) -> f64 {
    ab(bytes) / 32768.0
}

fn wide_range_current(bytes: &[u8]) -> f64 {
    cd(bytes) / 256.0 - 128.0
}

fn catalyst_temp(bytes: &[u8]) -> f64 {
    ab(bytes) / 10.0 - 40.0
}

fn torque(bytes: &[u8]) -> f64 {
    a(bytes) - 125.0
}

/// Mode 01 catalog
pub static CATALOG: &[ObdPid] = &[
    ObdPid::new(0x00, "PIDS_SUPPORTED_01_20", "PIDs supported [01-20]", "bitmask", 4, bitmask),
    ObdPid::new(0x01, "MONITOR_STATUS", "Monitor status since DTCs cleared", "bitmask", 4, bitmask),
    ObdPid::new(0x02, "FREEZE_DTC", "DTC that caused freeze frame", "code", 2, ab),
    ObdPid::new(0x03, "FUEL_SYSTEM_STATUS", "Fuel system status", "bitmask", 2, ab),
    ObdPid::new(0x04, "ENGINE_LOAD", "Calculated engine load", "%", 1, percent),
    ObdPid::new(0x05, "ENGINE_COOLANT_TEMP", "Engine coolant temperature", "°C", 1, offset40),
    ObdPid::new(0x06, "SHORT_TERM_FUEL_TRIM_BANK1", "Short term fuel trim - bank 1", "%", 1, signed_percent),
    ObdPid::new(0x07, "LONG_TERM_FUEL_TRIM_BANK1", "Long term fuel trim - bank 1", "%", 1, signed_percent),
    ObdPid::new(0x08, "SHORT_TERM_FUEL_TRIM_BANK2", "Short term fuel trim - bank 2", "%", 1, signed_percent),
    ObdPid::new(0x09, "LONG_TERM_FUEL_TRIM_BANK2", "Long term fuel trim - bank 2", "%", 1, signed_percent),
    ObdPid::new(0x0A, "FUEL_PRESSURE", "Fuel pressure (gauge)", "kPa", 1, |b| a(b) * 3.0),
    ObdPid::new(0x0B, "INTAKE_MANIFOLD_PRESSURE", "Intake manifold absolute pressure", "kPa", 1, a),
    ObdPid::new(0x0C, "ENGINE_RPM", "Engine speed", "rpm", 2, |b| ab(b) / 4.0),
    ObdPid::new(0x0D, "VEHICLE_SPEED", "Vehicle speed", "km/h", 1, a),
    ObdPid::new(0x0E, "TIMING_ADVANCE", "Timing advance", "°", 1, |b| a(b) / 2.0 - 64.0),
    ObdPid::new(0x0F, "INTAKE_AIR_TEMP", "Intake air temperature", "°C", 1, offset40),
    ObdPid::new(0x10, "MAF_FLOW_RATE", "Mass air flow rate", "g/s", 2, |b| ab(b) / 100.0),
    ObdPid::new(0x11, "THROTTLE_POSITION", "Throttle position", "%", 1, percent),
    ObdPid::new(0x12, "COMMANDED_SECONDARY_AIR_STATUS", "Commanded secondary air status", "status", 1, a),
    ObdPid::new(0x13, "O2_SENSORS_PRESENT_2_BANKS", "Oxygen sensors present (2 banks)", "bitmask", 1, a),
    ObdPid::new(0x14, "O2_SENSOR_B1S1_VOLTAGE", "O2 sensor voltage - bank 1 sensor 1", "V", 2, o2_voltage),
    ObdPid::new(0x15, "O2_SENSOR_B1S2_VOLTAGE", "O2 sensor voltage - bank 1 sensor 2", "V", 2, o2_voltage),
    ObdPid::new(0x16, "O2_SENSOR_B1S3_VOLTAGE", "O2 sensor voltage - bank 1 sensor 3", "V", 2, o2_voltage),
    ObdPid::new(0x17, "O2_SENSOR_B1S4_VOLTAGE", "O2 sensor voltage - bank 1 sensor 4", "V", 2, o2_voltage),
    ObdPid::new(0x18, "O2_SENSOR_B2S1_VOLTAGE", "O2 sensor voltage - bank 2 sensor 1", "V", 2, o2_voltage),
    ObdPid::new(0x19, "O2_SENSOR_B2S2_VOLTAGE", "O2 sensor voltage - bank 2 sensor 2", "V", 2, o2_voltage),
    ObdPid::new(0x1A, "O2_SENSOR_B2S3_VOLTAGE", "O2 sensor voltage - bank 2 sensor 3", "V", 2, o2_voltage),
    ObdPid::new(0x1B, "O2_SENSOR_B2S4_VOLTAGE", "O2 sensor voltage - bank 2 sensor 4", "V", 2, o2_voltage),
    ObdPid::new(0x1C, "OBD_STANDARDS", "OBD standards this vehicle conforms to", "type", 1, a),
    ObdPid::new(0x1D, "O2_SENSORS_PRESENT_4_BANKS", "Oxygen sensors present (4 banks)", "bitmask", 1, a),
    ObdPid::new(0x1E, "AUXILIARY_INPUT_STATUS", "Auxiliary input status", "status", 1, a),
    ObdPid::new(0x1F, "RUNTIME_SINCE_START", "Run time since engine start", "sec", 2, ab),
    ObdPid::new(0x20, "PIDS_SUPPORTED_21_40", "PIDs supported [21-40]", "bitmask", 4, bitmask),
    ObdPid::new(0x21, "DISTANCE_WITH_MIL_ON", "Distance traveled with MIL on", "km", 2, ab),
    ObdPid::new(0x22, "FUEL_RAIL_PRESSURE_VAC", "Fuel rail pressure (relative to vacuum)", "kPa", 2, |b| ab(b) * 0.079),
    ObdPid::new(0x23, "FUEL_RAIL_GAUGE_PRESSURE", "Fuel rail gauge pressure", "kPa", 2, |b| ab(b) * 10.0),
    ObdPid::new(0x24, "O2_SENSOR_B1S1_LAMBDA", "O2 sensor equivalence ratio - bank 1 sensor 1", "ratio", 4, lambda),
    ObdPid::new(0x25, "O2_SENSOR_B1S2_LAMBDA", "O2 sensor equivalence ratio - bank 1 sensor 2", "ratio", 4, lambda),
    ObdPid::new(0x26, "O2_SENSOR_B2S1_LAMBDA", "O2 sensor equivalence ratio - bank 2 sensor 1", "ratio", 4, lambda),
    ObdPid::new(0x27, "O2_SENSOR_B2S2_LAMBDA", "O2 sensor equivalence ratio - bank 2 sensor 2", "ratio", 4, lambda),
    ObdPid::new(0x28, "O2_SENSOR_B3S1_LAMBDA", "O2 sensor equivalence ratio - bank 3 sensor 1", "ratio", 4, lambda),
    ObdPid::new(0x29, "O2_SENSOR_B3S2_LAMBDA", "O2 sensor equivalence ratio - bank 3 sensor 2", "ratio", 4, lambda),
    ObdPid::new(0x2A, "O2_SENSOR_B4S1_LAMBDA", "O2 sensor equivalence ratio - bank 4 sensor 1", "ratio", 4, lambda),
    ObdPid::new(0x2B, "O2_SENSOR_B4S2_LAMBDA", "O2 sensor equivalence ratio - bank 4 sensor 2", "ratio", 4, lambda),
    ObdPid::new(0x2C, "COMMANDED_EGR", "Commanded EGR", "%", 1, percent),
    ObdPid::new(0x2D, "EGR_ERROR", "EGR error", "%", 1, signed_percent),
    ObdPid::new(0x2E, "COMMANDED_EVAP_PURGE", "Commanded evaporative purge", "%", 1, percent),
    ObdPid::new(0x2F, "FUEL_TANK_LEVEL", "Fuel tank level input", "%", 1, percent),
    ObdPid::new(0x30, "WARMUPS_SINCE_CODES_CLEARED", "Warm-ups since codes cleared", "count", 1, a),
    ObdPid::new(0x31, "DISTANCE_SINCE_CODES_CLEARED", "Distance traveled since codes cleared", "km", 2, ab),
    ObdPid::new(0x32, "EVAP_SYSTEM_VAPOR_PRESSURE", "Evap. system vapor pressure", "Pa", 2, |b| {
        i16::from_be_bytes([b[0], b[1]]) as f64 / 4.0
    }),
    ObdPid::new(0x33, "BAROMETRIC_PRESSURE", "Absolute barometric pressure", "kPa", 1, a),
    ObdPid::new(0x34, "O2_SENSOR_B1S1_CURRENT", "O2 sensor current - bank 1 sensor 1", "mA", 4, wide_range_current),
    ObdPid::new(0x35, "O2_SENSOR_B1S2_CURRENT", "O2 sensor current - bank 1 sensor 2", "mA", 4, wide_range_current),
    ObdPid::new(0x36, "O2_SENSOR_B2S1_CURRENT", "O2 sensor current - bank 2 sensor 1", "mA", 4, wide_range_current),
    ObdPid::new(0x37, "O2_SENSOR_B2S2_CURRENT", "O2 sensor current - bank 2 sensor 2", "mA", 4, wide_range_current),
    ObdPid::new(0x38, "O2_SENSOR_B3S1_CURRENT", "O2 sensor current - bank 3 sensor 1", "mA", 4, wide_range_current),
    ObdPid::new(0x39, "O2_SENSOR_B3S2_CURRENT", "O2 sensor current - bank 3 sensor 2", "mA", 4, wide_range_current),
    ObdPid::new(0x3A, "O2_SENSOR_B4S1_CURRENT", "O2 sensor current - bank 4 sensor 1", "mA", 4, wide_range_current),
    ObdPid::new(0x3B, "O2_SENSOR_B4S2_CURRENT", "O2 sensor current - bank 4 sensor 2", "mA", 4, wide_range_current),
    ObdPid::new(0x3C, "CATALYST_TEMP_B1S1", "Catalyst temperature - bank 1 sensor 1", "°C", 2, catalyst_temp),
    ObdPid::new(0x3D, "CATALYST_TEMP_B2S1", "Catalyst temperature - bank 2 sensor 1", "°C", 2, catalyst_temp),
    ObdPid::new(0x3E, "CATALYST_TEMP_B1S2", "Catalyst temperature - bank 1 sensor 2", "°C", 2, catalyst_temp),
    ObdPid::new(0x3F, "CATALYST_TEMP_B2S2", "Catalyst temperature - bank 2 sensor 2", "°C", 2, catalyst_temp),
    ObdPid::new(0x40, "PIDS_SUPPORTED_41_60", "PIDs supported [41-60]", "bitmask", 4, bitmask),
    ObdPid::new(0x41, "MONITOR_STATUS_DRIVE_CYCLE", "Monitor status this drive cycle", "bitmask", 4, bitmask),
    ObdPid::new(0x42, "CONTROL_MODULE_VOLTAGE", "Control module voltage", "V", 2, |b| ab(b) / 1000.0),
    ObdPid::new(0x43, "ABSOLUTE_LOAD", "Absolute load value", "%", 2, |b| ab(b) * 100.0 / 255.0),
    ObdPid::new(0x44, "COMMANDED_AIR_FUEL_RATIO", "Commanded air-fuel equivalence ratio", "ratio", 2, lambda),
    ObdPid::new(0x45, "RELATIVE_THROTTLE_POSITION", "Relative throttle position", "%", 1, percent),
    ObdPid::new(0x46, "AMBIENT_AIR_TEMP", "Ambient air temperature", "°C", 1, offset40),
    ObdPid::new(0x47, "ABSOLUTE_THROTTLE_POSITION_B", "Absolute throttle position B", "%", 1, percent),
    ObdPid::new(0x48, "ABSOLUTE_THROTTLE_POSITION_C", "Absolute throttle position C", "%", 1, percent),
    ObdPid::new(0x49, "ACCELERATOR_PEDAL_POSITION_D", "Accelerator pedal position D", "%", 1, percent),
    ObdPid::new(0x4A, "ACCELERATOR_PEDAL_POSITION_E", "Accelerator pedal position E", "%", 1, percent),
    ObdPid::new(0x4B, "ACCELERATOR_PEDAL_POSITION_F", "Accelerator pedal position F", "%", 1, percent),
    ObdPid::new(0x4C, "COMMANDED_THROTTLE_ACTUATOR", "Commanded throttle actuator", "%", 1, percent),
    ObdPid::new(0x4D, "TIME_WITH_MIL_ON", "Time run with MIL on", "min", 2, ab),
    ObdPid::new(0x4E, "TIME_SINCE_CODES_CLEARED", "Time since trouble codes cleared", "min", 2, ab),
    ObdPid::new(0x4F, "MAX_VALUES_FUEL_AIR_O2_VOLTAGE", "Maximum equivalence ratio, O2 voltage, O2 current, MAP", "various", 4, a),
    ObdPid::new(0x50, "MAX_MAF_FLOW_RATE", "Maximum mass air flow rate", "g/s", 4, |b| a(b) * 10.0),
    ObdPid::new(0x51, "FUEL_TYPE", "Fuel type", "type", 1, a),
    ObdPid::new(0x52, "ETHANOL_FUEL_PERCENT", "Ethanol fuel percentage", "%", 1, percent),
    ObdPid::new(0x53, "ABSOLUTE_EVAP_SYSTEM_VAPOR_PRESSURE", "Absolute evap. system vapor pressure", "kPa", 2, |b| ab(b) / 200.0),
    ObdPid::new(0x54, "EVAP_SYSTEM_VAPOR_PRESSURE_2", "Evap. system vapor pressure", "Pa", 2, |b| ab(b) - 32767.0),
    ObdPid::new(0x55, "SHORT_TERM_O2_TRIM_BANK1_BANK3", "Short term secondary O2 trim - bank 1/3", "%", 2, signed_percent),
    ObdPid::new(0x56, "LONG_TERM_O2_TRIM_BANK1_BANK3", "Long term secondary O2 trim - bank 1/3", "%", 2, signed_percent),
    ObdPid::new(0x57, "SHORT_TERM_O2_TRIM_BANK2_BANK4", "Short term secondary O2 trim - bank 2/4", "%", 2, signed_percent),
    ObdPid::new(0x58, "LONG_TERM_O2_TRIM_BANK2_BANK4", "Long term secondary O2 trim - bank 2/4", "%", 2, signed_percent),
    ObdPid::new(0x59, "FUEL_RAIL_ABSOLUTE_PRESSURE", "Fuel rail absolute pressure", "kPa", 2, |b| ab(b) * 10.0),
    ObdPid::new(0x5A, "RELATIVE_ACCELERATOR_PEDAL_POSITION", "Relative accelerator pedal position", "%", 1, percent),
    ObdPid::new(0x5B, "HYBRID_BATTERY_PACK_LIFE", "Hybrid battery pack remaining life", "%", 1, percent),
    ObdPid::new(0x5C, "ENGINE_OIL_TEMP", "Engine oil temperature", "°C", 1, offset40),
    ObdPid::new(0x5D, "FUEL_INJECTION_TIMING", "Fuel injection timing", "°", 2, |b| ab(b) / 128.0 - 210.0),
    ObdPid::new(0x5E, "ENGINE_FUEL_RATE", "Engine fuel rate", "L/h", 2, |b| ab(b) / 20.0),
    ObdPid::new(0x5F, "EMISSION_REQUIREMENTS", "Emission requirements of the vehicle", "type", 1, a),
    ObdPid::new(0x60, "PIDS_SUPPORTED_61_80", "PIDs supported [61-80]", "bitmask", 4, bitmask),
    ObdPid::new(0x61, "DEMANDED_ENGINE_TORQUE", "Driver's demand engine percent torque", "%", 1, torque),
    ObdPid::new(0x62, "ACTUAL_ENGINE_TORQUE", "Actual engine percent torque", "%", 1, torque),
    ObdPid::new(0x63, "ENGINE_REFERENCE_TORQUE", "Engine reference torque", "Nm", 2, ab),
    ObdPid::new(0x80, "PIDS_SUPPORTED_81_A0", "PIDs supported [81-A0]", "bitmask", 4, bitmask),
    ObdPid::new(0xA0, "PIDS_SUPPORTED_A1_C0", "PIDs supported [A1-C0]", "bitmask", 4, bitmask),
    ObdPid::new(0xC0, "PIDS_SUPPORTED_C1_E0", "PIDs supported [C1-E0]", "bitmask", 4, bitmask),
];
