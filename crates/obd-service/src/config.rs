//! Configuration
//!
//! Loaded from an optional `obd.toml` (or an explicit file) and then
//! overridden by `OBD_*` environment variables, with `__` between nested
//! keys: `OBD_SESSION__DEFAULT_TIMEOUT_MS=4000`.

use obd_protocol::{elm, ObdProtocol, LIVE_DATA_PIDS};
use obd_session::{LinkConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Polling interval bounds in milliseconds
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 5000;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObdConfig {
    pub link: LinkConfig,
    pub session: SessionConfig,
    pub adapter: AdapterConfig,
    pub polling: PollingConfig,
    pub log: LogConfig,
}

impl ObdConfig {
    /// Load `path` (or `obd.toml` when present), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("obd").required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("OBD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

/// Adapter setup and per-request deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Send `ATZ` before the init commands
    pub reset_on_connect: bool,
    /// AT commands sent after connecting
    pub init_commands: Vec<String>,
    /// Protocol selected after the init commands
    pub protocol: ObdProtocol,
    pub init_timeout_ms: u64,
    /// Identify the adapter chip after the init commands
    pub identify: bool,
    /// Per identification command; chips that ignore one are not waited on
    pub identify_timeout_ms: u64,
    /// Mode 03 / 07 / 04
    pub dtc_timeout_ms: u64,
    /// Mode 09
    pub info_timeout_ms: u64,
    /// Mode 01
    pub pid_timeout_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            reset_on_connect: false,
            init_commands: vec![
                elm::ECHO_OFF.to_string(),
                elm::LINEFEEDS_OFF.to_string(),
                elm::SPACES_ON.to_string(),
                elm::HEADERS_ON.to_string(),
            ],
            protocol: ObdProtocol::Auto,
            init_timeout_ms: 5000,
            identify: true,
            identify_timeout_ms: 1000,
            dtc_timeout_ms: 5000,
            info_timeout_ms: 5000,
            pid_timeout_ms: 3000,
        }
    }
}

impl AdapterConfig {
    /// Full command sequence run after connecting
    pub fn init_sequence(&self) -> Vec<String> {
        let mut sequence = Vec::with_capacity(self.init_commands.len() + 2);
        if self.reset_on_connect {
            sequence.push(elm::RESET.to_string());
        }
        sequence.extend(self.init_commands.iter().cloned());
        sequence.push(self.protocol.to_elm_command().to_string());
        sequence
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }

    pub fn dtc_timeout(&self) -> Duration {
        Duration::from_millis(self.dtc_timeout_ms)
    }

    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }

    pub fn pid_timeout(&self) -> Duration {
        Duration::from_millis(self.pid_timeout_ms)
    }
}

/// Live data polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Pause between cycles; clamped to 100..=5000 ms
    pub interval_ms: u64,
    /// Pause between PIDs within a cycle
    pub inter_pid_delay_ms: u64,
    /// PIDs polled when none are given
    pub pids: Vec<u8>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            inter_pid_delay_ms: 25,
            pids: LIVE_DATA_PIDS.to_vec(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS))
    }

    pub fn inter_pid_delay(&self) -> Duration {
        Duration::from_millis(self.inter_pid_delay_ms)
    }
}

/// Logging and the traffic log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines
    pub json: bool,
    /// Lines kept in the adapter traffic log
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            capacity: ring_buffer::DEFAULT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_session::LinkKind;

    #[test]
    fn test_defaults() {
        let config = ObdConfig::default();
        assert_eq!(config.session.default_timeout_ms, 3000);
        assert_eq!(config.adapter.dtc_timeout(), Duration::from_secs(5));
        assert_eq!(config.polling.interval(), Duration::from_millis(500));
        assert_eq!(config.polling.pids, vec![0x0C, 0x0D, 0x05, 0x11, 0x04]);
        assert_eq!(config.log.capacity, 200);
        assert!(config.adapter.identify);
        assert_eq!(config.adapter.identify_timeout(), Duration::from_secs(1));
        assert_eq!(
            config.adapter.init_sequence(),
            vec!["ATE0", "ATL0", "ATS1", "ATH1", "ATSP0"]
        );
    }

    #[test]
    fn test_reset_and_protocol() {
        let adapter = AdapterConfig {
            reset_on_connect: true,
            protocol: ObdProtocol::Can11bit500,
            init_commands: vec!["ATE0".into()],
            ..Default::default()
        };
        assert_eq!(adapter.init_sequence(), vec!["ATZ", "ATE0", "ATSP6"]);
    }

    #[test]
    fn test_poll_interval_clamped() {
        let fast = PollingConfig { interval_ms: 10, ..Default::default() };
        let slow = PollingConfig { interval_ms: 60_000, ..Default::default() };
        assert_eq!(fast.interval(), Duration::from_millis(100));
        assert_eq!(slow.interval(), Duration::from_millis(5000));
    }

    #[test]
    fn test_from_toml() {
        let config = ObdConfig::from_toml(
            r#"
            [link]
            kind = "bluetooth"
            device = "/dev/rfcomm2"

            [session]
            iso_tp = "never"

            [polling]
            interval_ms = 250
            pids = [12, 13]
            "#,
        )
        .unwrap();

        assert_eq!(config.link.kind, LinkKind::Bluetooth);
        assert_eq!(config.link.device, "/dev/rfcomm2");
        assert_eq!(config.link.baud_rate, 38400);
        assert_eq!(config.session.iso_tp, obd_session::IsoTpMode::Never);
        assert_eq!(config.polling.interval(), Duration::from_millis(250));
        assert_eq!(config.polling.pids, vec![0x0C, 0x0D]);
        assert_eq!(config.adapter.pid_timeout_ms, 3000);
    }
}
