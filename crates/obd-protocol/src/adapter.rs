//! Adapter Identification
//!
//! Works out which chip sits behind the serial link from the text it prints
//! for its identification commands (`STI`/`STDI`/`STMFR` on STN chips,
//! `ATI`/`AT@1` on everything else), and attaches the timing limits that
//! chip family is known to cope with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name reported when the adapter gives nothing usable
pub const UNKNOWN_DEVICE: &str = "Unknown OBD Adapter";

/// Chip family behind the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterFamily {
    /// Genuine ELM Electronics firmware
    Elm327,
    /// ELM327 clone (v1.5 and fake v2.1 firmware)
    ElmClone,
    /// ScanTool STN11xx/STN22xx
    Stn,
    /// OBDLink devices built on STN chips
    Obdlink,
    /// ESP32 based WiFi adapters
    Esp32,
    #[default]
    Unknown,
}

impl AdapterFamily {
    /// Limits a device of this family is expected to handle
    pub fn capabilities(self) -> AdapterCapabilities {
        match self {
            AdapterFamily::Obdlink | AdapterFamily::Stn => AdapterCapabilities {
                buffer_size: 1024,
                max_poll_rate_hz: 25,
                recommended_delay_ms: 5,
                requires_delay_between_commands: false,
                long_can_frames: true,
                needs_keepalive: false,
            },
            AdapterFamily::Elm327 => AdapterCapabilities {
                buffer_size: 256,
                max_poll_rate_hz: 12,
                recommended_delay_ms: 10,
                requires_delay_between_commands: false,
                long_can_frames: true,
                needs_keepalive: false,
            },
            AdapterFamily::ElmClone => AdapterCapabilities {
                buffer_size: 128,
                max_poll_rate_hz: 8,
                recommended_delay_ms: 30,
                requires_delay_between_commands: true,
                long_can_frames: false,
                needs_keepalive: true,
            },
            AdapterFamily::Esp32 => AdapterCapabilities {
                buffer_size: 512,
                max_poll_rate_hz: 50,
                recommended_delay_ms: 2,
                requires_delay_between_commands: false,
                long_can_frames: true,
                needs_keepalive: false,
            },
            AdapterFamily::Unknown => AdapterCapabilities::default(),
        }
    }
}

impl fmt::Display for AdapterFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterFamily::Elm327 => "ELM327",
            AdapterFamily::ElmClone => "ELM327 clone",
            AdapterFamily::Stn => "STN",
            AdapterFamily::Obdlink => "OBDLink",
            AdapterFamily::Esp32 => "ESP32",
            AdapterFamily::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Timing and buffering limits of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    /// Receive buffer in bytes
    pub buffer_size: usize,
    /// Highest sustainable request rate
    pub max_poll_rate_hz: u32,
    /// Pause between consecutive commands
    pub recommended_delay_ms: u64,
    /// Commands sent back to back get dropped
    pub requires_delay_between_commands: bool,
    /// Accepts messages longer than 7 bytes (ATAL)
    pub long_can_frames: bool,
    /// Link goes quiet unless poked periodically
    pub needs_keepalive: bool,
}

impl Default for AdapterCapabilities {
    /// Conservative limits for an adapter nothing is known about
    fn default() -> Self {
        Self {
            buffer_size: 128,
            max_poll_rate_hz: 6,
            recommended_delay_ms: 35,
            requires_delay_between_commands: true,
            long_can_frames: false,
            needs_keepalive: false,
        }
    }
}

/// Text the adapter printed for each identification command. Commands it
/// did not understand leave their field empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterIdentity {
    /// `STI`, e.g. `STN2255 v5.6.19`
    pub sti: String,
    /// `STDI`, e.g. `OBDLink MX+ r1.2`
    pub stdi: String,
    /// `STMFR`, e.g. `OBD Solutions LLC`
    pub stmfr: String,
    /// `ATI`, e.g. `ELM327 v1.5`
    pub ati: String,
    /// `AT@1`, e.g. `OBDII to RS232 Interpreter`
    pub at1: String,
}

impl AdapterIdentity {
    /// Whether the adapter answered `STI` like an STN chip
    pub fn is_stn(&self) -> bool {
        self.sti.trim().to_ascii_uppercase().starts_with("STN")
    }
}

/// What is known about the connected adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_name: String,
    pub family: AdapterFamily,
    /// Lowercase, as printed (`v1.5`, `v5.6`); empty when not reported
    pub firmware_version: String,
    pub capabilities: AdapterCapabilities,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            device_name: UNKNOWN_DEVICE.to_string(),
            family: AdapterFamily::Unknown,
            firmware_version: String::new(),
            capabilities: AdapterCapabilities::default(),
        }
    }
}

impl DeviceProfile {
    /// Build a profile from identification replies. A device listed in
    /// [`KNOWN_DEVICES`] takes its curated profile, keeping the firmware
    /// version it reported.
    pub fn identify(identity: &AdapterIdentity) -> Self {
        if identity.is_stn() {
            Self::identify_stn(identity)
        } else {
            Self::identify_elm(identity)
        }
    }

    fn identify_stn(identity: &AdapterIdentity) -> Self {
        let firmware_version = firmware_version(&identity.sti);
        if let Some(known) = KnownDevice::lookup(&identity.stdi).or_else(|| KnownDevice::lookup(&identity.sti)) {
            return known.profile(firmware_version);
        }

        let family = if identity.stmfr.contains("OBD Solutions") {
            AdapterFamily::Obdlink
        } else {
            AdapterFamily::Stn
        };
        // STDI prints "<name> r<revision>"
        let name = identity.stdi.split(" r").next().unwrap_or_default().trim();
        let device_name = if name.is_empty() { identity.sti.trim() } else { name };

        Self {
            device_name: device_name.to_string(),
            family,
            firmware_version,
            capabilities: family.capabilities(),
        }
    }

    fn identify_elm(identity: &AdapterIdentity) -> Self {
        let firmware_version = firmware_version(&identity.ati);
        if let Some(known) = KnownDevice::lookup(&identity.at1).or_else(|| KnownDevice::lookup(&identity.ati)) {
            return known.profile(firmware_version);
        }

        let mut family = family_from_text(&format!("{} {}", identity.ati, identity.at1));
        if family == AdapterFamily::Elm327 && is_clone_firmware(&firmware_version, &identity.at1) {
            family = AdapterFamily::ElmClone;
        }

        let device_name = [identity.at1.trim(), identity.ati.trim()]
            .into_iter()
            .find(|text| text.len() > 3)
            .unwrap_or(UNKNOWN_DEVICE);

        Self {
            device_name: device_name.to_string(),
            family,
            firmware_version,
            capabilities: family.capabilities(),
        }
    }

    pub fn is_clone(&self) -> bool {
        self.family == AdapterFamily::ElmClone
    }

    /// STN based adapters keep up with fast polling
    pub fn is_high_performance(&self) -> bool {
        matches!(self.family, AdapterFamily::Stn | AdapterFamily::Obdlink)
    }
}

fn family_from_text(text: &str) -> AdapterFamily {
    let upper = text.to_ascii_uppercase();
    if upper.contains("OBDLINK") {
        AdapterFamily::Obdlink
    } else if upper.contains("STN") {
        AdapterFamily::Stn
    } else if upper.contains("ELM327") {
        AdapterFamily::Elm327
    } else if upper.contains("ESP") {
        AdapterFamily::Esp32
    } else {
        AdapterFamily::Unknown
    }
}

/// Clones report v1.5, or v2.1 with a blank or rebranded device string
fn is_clone_firmware(version: &str, at1: &str) -> bool {
    match version.trim_start_matches('v') {
        "1.5" => true,
        "2.1" => {
            let at1 = at1.trim().to_ascii_uppercase();
            let genuine = ["OBDII TO RS232", "ELM ELECTRONICS"].iter().any(|p| at1.contains(p));
            let rebranded = ["OBDIISCAN", "SCANTOOL", "ICAR", "VGATE", "VEEPEAK", "BAFX"]
                .iter()
                .any(|brand| at1.contains(brand));
            !genuine && (at1.is_empty() || rebranded)
        }
        _ => false,
    }
}

/// First `[v]<major>.<minor>[letter]` in `text`, lowercased
pub fn firmware_version(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let digits_from = |from: usize| chars.iter().skip(from).take_while(|c| c.is_ascii_digit()).count();

    for start in 0..chars.len() {
        let mut at = start;
        if matches!(chars[at], 'v' | 'V') {
            at += 1;
        }
        let major = digits_from(at);
        if major == 0 || chars.get(at + major) != Some(&'.') {
            continue;
        }
        let minor = digits_from(at + major + 1);
        if minor == 0 {
            continue;
        }
        let mut end = at + major + 1 + minor;
        if chars.get(end).map_or(false, |c| c.is_ascii_alphabetic()) {
            end += 1;
        }
        return chars[start..end].iter().collect::<String>().to_lowercase();
    }
    String::new()
}

/// Curated entry for a device seen in the field
#[derive(Debug, Clone, Copy)]
pub struct KnownDevice {
    /// Lowercase text the device includes in its identification replies
    pub key: &'static str,
    pub name: &'static str,
    pub family: AdapterFamily,
    pub capabilities: AdapterCapabilities,
    /// Reported when the device itself prints no version
    pub firmware_version: &'static str,
}

const fn limits(
    buffer_size: usize,
    max_poll_rate_hz: u32,
    recommended_delay_ms: u64,
    clone: bool,
) -> AdapterCapabilities {
    AdapterCapabilities {
        buffer_size,
        max_poll_rate_hz,
        recommended_delay_ms,
        requires_delay_between_commands: clone,
        long_can_frames: !clone,
        needs_keepalive: false,
    }
}

/// Known devices; the first key contained in the reply wins, so more
/// specific keys come first
pub const KNOWN_DEVICES: &[KnownDevice] = &[
    KnownDevice {
        key: "obdlink mx+",
        name: "OBDLink MX+",
        family: AdapterFamily::Obdlink,
        capabilities: limits(2048, 30, 0, false),
        firmware_version: "5.x",
    },
    KnownDevice {
        key: "obdlink mx",
        name: "OBDLink MX",
        family: AdapterFamily::Obdlink,
        capabilities: limits(1024, 25, 0, false),
        firmware_version: "4.x",
    },
    KnownDevice {
        key: "obdlink lx",
        name: "OBDLink LX",
        family: AdapterFamily::Obdlink,
        capabilities: limits(1024, 25, 0, false),
        firmware_version: "4.x",
    },
    KnownDevice {
        key: "obdlink sx",
        name: "OBDLink SX",
        family: AdapterFamily::Obdlink,
        capabilities: limits(1024, 25, 0, false),
        firmware_version: "4.x",
    },
    KnownDevice {
        key: "obdlink cx",
        name: "OBDLink CX",
        family: AdapterFamily::Obdlink,
        capabilities: limits(1024, 25, 0, false),
        firmware_version: "5.x",
    },
    KnownDevice {
        key: "veepeak",
        name: "Veepeak Mini Bluetooth",
        family: AdapterFamily::ElmClone,
        capabilities: limits(128, 8, 30, true),
        firmware_version: "v1.5",
    },
    KnownDevice {
        key: "bafx",
        name: "BAFX Bluetooth",
        family: AdapterFamily::ElmClone,
        capabilities: limits(128, 8, 30, true),
        firmware_version: "v1.5",
    },
    KnownDevice {
        key: "konnwei",
        name: "KONNWEI KW902",
        family: AdapterFamily::ElmClone,
        capabilities: limits(64, 6, 35, true),
        firmware_version: "v1.5",
    },
    KnownDevice {
        key: "generic elm327",
        name: "Generic ELM327 Bluetooth",
        family: AdapterFamily::ElmClone,
        capabilities: limits(128, 8, 30, true),
        firmware_version: "v1.5",
    },
];

impl KnownDevice {
    /// Registry entry whose key occurs in `hint` (case-insensitive)
    pub fn lookup(hint: &str) -> Option<&'static KnownDevice> {
        let hint = hint.to_lowercase();
        if hint.trim().is_empty() {
            return None;
        }
        KNOWN_DEVICES.iter().find(|device| hint.contains(device.key))
    }

    fn profile(&self, firmware_version: String) -> DeviceProfile {
        let firmware_version = if firmware_version.is_empty() {
            self.firmware_version.to_string()
        } else {
            firmware_version
        };
        DeviceProfile {
            device_name: self.name.to_string(),
            family: self.family,
            firmware_version,
            capabilities: self.capabilities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elm(ati: &str, at1: &str) -> AdapterIdentity {
        AdapterIdentity {
            ati: ati.into(),
            at1: at1.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_firmware_version() {
        assert_eq!(firmware_version("ELM327 v1.5"), "v1.5");
        assert_eq!(firmware_version("ELM327 V2.1a"), "v2.1a");
        assert_eq!(firmware_version("STN2255 v5.6.19"), "v5.6");
        assert_eq!(firmware_version("ESP32-OBD 3.02"), "3.02");
        assert_eq!(firmware_version("OK"), "");
        assert_eq!(firmware_version(""), "");
    }

    #[test]
    fn test_genuine_elm327() {
        let profile = DeviceProfile::identify(&elm("ELM327 v2.2", "OBDII to RS232 Interpreter"));
        assert_eq!(profile.family, AdapterFamily::Elm327);
        assert_eq!(profile.device_name, "OBDII to RS232 Interpreter");
        assert_eq!(profile.firmware_version, "v2.2");
        assert_eq!(profile.capabilities.buffer_size, 256);
        assert!(!profile.is_clone());
    }

    #[test]
    fn test_clone_detection() {
        let v15 = DeviceProfile::identify(&elm("ELM327 v1.5", "OBDII to RS232 Interpreter"));
        assert!(v15.is_clone());
        assert_eq!(v15.capabilities.recommended_delay_ms, 30);
        assert!(v15.capabilities.needs_keepalive);

        assert!(DeviceProfile::identify(&elm("ELM327 v2.1", "")).is_clone());
        assert!(DeviceProfile::identify(&elm("ELM327 v2.1", "iCar Pro")).is_clone());
        assert!(!DeviceProfile::identify(&elm("ELM327 v2.1", "ELM Electronics")).is_clone());
        // Unbranded but non-empty device string is given the benefit of the doubt
        assert!(!DeviceProfile::identify(&elm("ELM327 v2.1", "Car Reader")).is_clone());
    }

    #[test]
    fn test_stn_path() {
        let identity = AdapterIdentity {
            sti: "STN1170 v4.2.1".into(),
            stdi: "Acme Reader r1.0".into(),
            stmfr: "ScanTool.net".into(),
            ..Default::default()
        };
        let profile = DeviceProfile::identify(&identity);
        assert_eq!(profile.family, AdapterFamily::Stn);
        assert_eq!(profile.device_name, "Acme Reader");
        assert_eq!(profile.firmware_version, "v4.2");
        assert!(profile.is_high_performance());

        let obdlink = AdapterIdentity {
            stmfr: "OBD Solutions LLC".into(),
            stdi: String::new(),
            ..identity
        };
        let profile = DeviceProfile::identify(&obdlink);
        assert_eq!(profile.family, AdapterFamily::Obdlink);
        assert_eq!(profile.device_name, "STN1170 v4.2.1");
    }

    #[test]
    fn test_known_device_wins() {
        let identity = AdapterIdentity {
            sti: "STN2255 v5.6.19".into(),
            stdi: "OBDLink MX+ r2.1".into(),
            stmfr: "OBD Solutions LLC".into(),
            ..Default::default()
        };
        let profile = DeviceProfile::identify(&identity);
        assert_eq!(profile.device_name, "OBDLink MX+");
        assert_eq!(profile.capabilities.buffer_size, 2048);
        assert_eq!(profile.firmware_version, "v5.6");

        let veepeak = DeviceProfile::identify(&elm("", "VEEPEAK OBDCheck"));
        assert_eq!(veepeak.device_name, "Veepeak Mini Bluetooth");
        assert_eq!(veepeak.family, AdapterFamily::ElmClone);
        assert_eq!(veepeak.firmware_version, "v1.5");
    }

    #[test]
    fn test_known_device_lookup_order() {
        assert_eq!(KnownDevice::lookup("OBDLink MX r1").map(|d| d.name), Some("OBDLink MX"));
        assert_eq!(KnownDevice::lookup("obdlink mx+").map(|d| d.name), Some("OBDLink MX+"));
        assert!(KnownDevice::lookup("").is_none());
        assert!(KnownDevice::lookup("ELM327 v1.5").is_none());
    }

    #[test]
    fn test_unrecognized_adapter() {
        let profile = DeviceProfile::identify(&AdapterIdentity::default());
        assert_eq!(profile, DeviceProfile::default());
        assert_eq!(profile.device_name, UNKNOWN_DEVICE);

        let esp = DeviceProfile::identify(&elm("ESP32 OBD v1.0", ""));
        assert_eq!(esp.family, AdapterFamily::Esp32);
        assert_eq!(esp.capabilities.max_poll_rate_hz, 50);
    }
}
