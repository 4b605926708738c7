//! Link and session configuration

use crate::link::Target;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Physical medium to the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// WiFi adapters exposing a TCP socket
    #[default]
    Tcp,
    /// Bluetooth SPP adapters bound to a serial device node (`/dev/rfcomm0`)
    Bluetooth,
}

/// Where and how to reach the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub kind: LinkKind,
    /// TCP host
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Serial device path for Bluetooth adapters
    pub device: String,
    pub baud_rate: u32,
    pub connect_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::Tcp,
            host: "192.168.0.10".to_string(),
            port: 35000,
            device: "/dev/rfcomm0".to_string(),
            baud_rate: 38400,
            connect_timeout_ms: 3000,
        }
    }
}

impl LinkConfig {
    /// Connection target selected by `kind`
    pub fn target(&self) -> Target {
        match self.kind {
            LinkKind::Tcp => Target::Tcp {
                host: self.host.clone(),
                port: self.port,
            },
            LinkKind::Bluetooth => Target::Bluetooth {
                device: self.device.clone(),
                baud_rate: self.baud_rate,
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// When response lines are routed through the ISO-TP assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsoTpMode {
    /// Lines carrying a CAN id, and headerless lines opening with an
    /// ISO-TP frame, are treated as frames
    #[default]
    Auto,
    /// Every line except indexed multi-line parts (`0: ...`) is a frame
    Always,
    /// The adapter reassembles; lines are passed through untouched
    Never,
}

/// Command exchange tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for commands that do not set their own
    pub default_timeout_ms: u64,
    /// Budget for flushing output left behind by an abandoned command
    pub drain_timeout_ms: u64,
    /// Cap on reassembled ISO-TP payloads
    pub max_payload: usize,
    pub iso_tp: IsoTpMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 3000,
            drain_timeout_ms: 500,
            max_payload: obd_protocol::DEFAULT_MAX_PAYLOAD,
            iso_tp: IsoTpMode::Auto,
        }
    }
}

impl SessionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target_is_tcp() {
        let config = LinkConfig::default();
        assert!(matches!(config.target(), Target::Tcp { port: 35000, .. }));
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_bluetooth_target() {
        let config = LinkConfig {
            kind: LinkKind::Bluetooth,
            device: "/dev/rfcomm1".to_string(),
            ..Default::default()
        };
        match config.target() {
            Target::Bluetooth { device, baud_rate } => {
                assert_eq!(device, "/dev/rfcomm1");
                assert_eq!(baud_rate, 38400);
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_millis(3000));
        assert_eq!(config.drain_timeout(), Duration::from_millis(500));
        assert_eq!(config.max_payload, 512);
        assert_eq!(config.iso_tp, IsoTpMode::Auto);
    }
}
