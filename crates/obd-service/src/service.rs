//! OBD-II diagnostic service

use crate::config::{AdapterConfig, ObdConfig};
use crate::error::ServiceError;
use crate::state::ServiceState;
use obd_protocol::{
    decode_dtc_message, decode_mode09_hex, decode_mode09_text, decode_pid_message,
    decode_support_bitmap, decode_vin_message, elm, info_type, is_clear_confirmation, mode,
    parse_reply, AdapterIdentity, DecodeError, DeviceProfile, DiagnosticTroubleCode, DtcStatus,
    ObdPid, PidReading, VehicleInfo,
};
use obd_session::{
    AdapterCommand, AdapterResponse, AdapterSession, ConnectionState, LinkConfig, SessionError,
    Target, TransportLink,
};
use ring_buffer::{DiagnosticLog, LogKind};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Response messages for one request: reassembled ISO-TP payloads when the
/// session produced any, otherwise the classified text lines
fn messages(response: &AdapterResponse) -> Result<Vec<Vec<u8>>, DecodeError> {
    if !response.payloads().is_empty() {
        return Ok(response.payloads().to_vec());
    }
    parse_reply(response.lines(), response.command())
}

/// Keep successes, drop decode failures, stop on anything else
fn optional<T>(result: Result<T, ServiceError>) -> Result<Option<T>, ServiceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ServiceError::Decode(e)) => {
            debug!("Optional request unanswered: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Marks the service busy for the lifetime of one request
struct BusyGuard<'a> {
    service: &'a ObdService,
}

impl<'a> BusyGuard<'a> {
    fn enter(service: &'a ObdService) -> Self {
        service.in_flight.fetch_add(1, Ordering::SeqCst);
        service.transition(ServiceState::Ready, ServiceState::Busy);
        Self { service }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.service.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.service.transition(ServiceState::Busy, ServiceState::Ready);
        }
    }
}

/// Diagnostic use-cases over one adapter session
pub struct ObdService {
    session: Arc<AdapterSession>,
    link: LinkConfig,
    adapter: AdapterConfig,
    state: watch::Sender<ServiceState>,
    in_flight: AtomicUsize,
    log: Arc<DiagnosticLog>,
    profile: StdMutex<Option<DeviceProfile>>,
}

impl ObdService {
    pub fn new(config: &ObdConfig) -> Self {
        let log = Arc::new(DiagnosticLog::new(config.log.capacity));
        let session = AdapterSession::new(config.session.clone()).with_log_sink(log.clone());
        let (state, _) = watch::channel(ServiceState::Idle);

        Self {
            session: Arc::new(session),
            link: config.link.clone(),
            adapter: config.adapter.clone(),
            state,
            in_flight: AtomicUsize::new(0),
            log,
            profile: StdMutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<AdapterSession> {
        &self.session
    }

    /// Raw adapter traffic for a debug console
    pub fn log(&self) -> &Arc<DiagnosticLog> {
        &self.log
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Observe service state changes
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// Adapter identified during the last initialization
    pub fn device_profile(&self) -> Option<DeviceProfile> {
        self.profile.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set_profile(&self, profile: Option<DeviceProfile>) {
        *self.profile.lock().unwrap_or_else(|p| p.into_inner()) = profile;
    }

    /// Observe the session's connection state
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe()
    }

    fn set_state(&self, next: ServiceState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Service state {} -> {}", previous, next);
        }
    }

    fn transition(&self, from: ServiceState, to: ServiceState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }

    /// Connect to the configured adapter and initialize it
    pub async fn connect(&self) -> Result<(), ServiceError> {
        let target = self.link.target();
        self.connect_to(&target).await
    }

    /// Connect to `target`, replacing any previous connection
    pub async fn connect_to(&self, target: &Target) -> Result<(), ServiceError> {
        self.session.disconnect().await;
        if let Err(e) = self.session.connect(target, self.link.connect_timeout()).await {
            self.set_state(ServiceState::Disconnected);
            return Err(e.into());
        }
        self.initialize().await
    }

    /// Use an already open link (simulated adapter, custom medium)
    pub async fn attach(&self, link: TransportLink) -> Result<(), ServiceError> {
        self.session.disconnect().await;
        if let Err(e) = self.session.attach(link).await {
            self.set_state(ServiceState::Disconnected);
            return Err(e.into());
        }
        self.initialize().await
    }

    /// Run the adapter init sequence, then identify the adapter. Replies
    /// other than `OK` are logged, not fatal.
    async fn initialize(&self) -> Result<(), ServiceError> {
        self.set_profile(None);
        for text in self.adapter.init_sequence() {
            let command = AdapterCommand::new(text.as_str()).with_timeout(self.adapter.init_timeout());
            match self.session.send_and_await(command).await {
                Ok(response) => {
                    let acknowledged = response
                        .lines()
                        .iter()
                        .any(|line| line.contains("OK") || line.starts_with("ELM"));
                    if !acknowledged {
                        warn!("Adapter did not acknowledge {}: {:?}", text, response.lines());
                    }
                }
                Err(e) => {
                    warn!("Adapter initialization failed at {}: {}", text, e);
                    self.set_state(ServiceState::Disconnected);
                    return Err(e.into());
                }
            }
        }

        if self.adapter.identify {
            match self.identify().await {
                Ok(profile) => {
                    info!(
                        "Adapter: {} ({}, firmware '{}')",
                        profile.device_name, profile.family, profile.firmware_version
                    );
                    if profile.is_clone() {
                        warn!("Clone adapter detected; keep polling slow");
                    }
                    self.log.record(
                        LogKind::Info,
                        format!("adapter {} ({})", profile.device_name, profile.family),
                    );
                    self.set_profile(Some(profile));
                }
                Err(e) => {
                    warn!("Adapter identification failed: {}", e);
                    self.set_state(ServiceState::Disconnected);
                    return Err(e);
                }
            }
        }

        self.log.record(LogKind::Info, "adapter initialized");
        self.set_state(ServiceState::Ready);
        info!("OBD service ready");
        Ok(())
    }

    /// STN chips answer `STI`; everything else is asked `ATI` and `AT@1`
    async fn identify(&self) -> Result<DeviceProfile, ServiceError> {
        let mut identity = AdapterIdentity {
            sti: self.identity_reply(elm::STN_IDENTIFY).await?,
            ..Default::default()
        };
        if identity.is_stn() {
            identity.stdi = self.identity_reply(elm::STN_DEVICE).await?;
            identity.stmfr = self.identity_reply(elm::STN_MANUFACTURER).await?;
        } else {
            identity.ati = self.identity_reply(elm::IDENTIFY).await?;
            identity.at1 = self.identity_reply(elm::DEVICE_DESCRIPTION).await?;
        }
        Ok(DeviceProfile::identify(&identity))
    }

    /// Text printed for one identification command, empty when the adapter
    /// rejected it or stayed silent
    async fn identity_reply(&self, text: &str) -> Result<String, ServiceError> {
        let command = AdapterCommand::new(text).with_timeout(self.adapter.identify_timeout());
        match self.session.send_and_await(command).await {
            Ok(response) => Ok(response
                .lines()
                .iter()
                .map(|line| line.trim())
                .filter(|line| {
                    !line.is_empty() && *line != "?" && *line != "OK" && !line.eq_ignore_ascii_case(text)
                })
                .collect::<Vec<_>>()
                .join(" ")),
            Err(SessionError::Timeout { .. }) => {
                debug!("No answer to {}", text);
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close the connection; the service returns to Idle
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
        self.set_profile(None);
        self.set_state(ServiceState::Idle);
    }

    async fn request(&self, command: AdapterCommand) -> Result<AdapterResponse, ServiceError> {
        let state = self.state();
        if !state.accepts_requests() {
            return Err(ServiceError::NotReady(state));
        }

        let _busy = BusyGuard::enter(self);
        match self.session.send_and_await(command).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_transport_failure() || matches!(e, SessionError::NotConnected) {
                    warn!("Transport failure, reconnect required: {}", e);
                    self.set_state(ServiceState::Disconnected);
                }
                Err(e.into())
            }
        }
    }

    /// Send arbitrary text and return the adapter's lines
    pub async fn send_raw(&self, text: &str) -> Result<Vec<String>, ServiceError> {
        let response = self.request(AdapterCommand::new(text)).await?;
        Ok(response.into_lines())
    }

    /// Mode 03
    pub async fn read_stored_dtcs(&self) -> Result<Vec<DiagnosticTroubleCode>, ServiceError> {
        self.read_dtcs(DtcStatus::Stored).await
    }

    /// Mode 07
    pub async fn read_pending_dtcs(&self) -> Result<Vec<DiagnosticTroubleCode>, ServiceError> {
        self.read_dtcs(DtcStatus::Pending).await
    }

    async fn read_dtcs(&self, status: DtcStatus) -> Result<Vec<DiagnosticTroubleCode>, ServiceError> {
        let command = AdapterCommand::new(format!("{:02X}", status.request_mode()))
            .with_timeout(self.adapter.dtc_timeout());
        let response = self.request(command).await?;

        let messages = match messages(&response) {
            Ok(messages) => messages,
            // No ECU reported anything
            Err(DecodeError::NoData) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut codes: Vec<DiagnosticTroubleCode> = Vec::new();
        let mut failure = None;
        let mut decoded = false;
        for message in &messages {
            match decode_dtc_message(message, status) {
                Ok(found) => {
                    decoded = true;
                    for dtc in found {
                        if !codes.contains(&dtc) {
                            codes.push(dtc);
                        }
                    }
                }
                Err(e) => {
                    debug!("Skipping message {:02X?}: {}", message, e);
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) if !decoded => Err(e.into()),
            _ => {
                info!("Read {} {:?} trouble code(s)", codes.len(), status);
                Ok(codes)
            }
        }
    }

    /// Mode 04. `Ok(false)` when the adapter answered without confirming.
    pub async fn clear_dtcs(&self) -> Result<bool, ServiceError> {
        let command = AdapterCommand::new(format!("{:02X}", mode::CLEAR_DTC))
            .with_timeout(self.adapter.dtc_timeout());
        let response = self.request(command).await?;

        let positive = mode::response(mode::CLEAR_DTC);
        let confirmed = response.payloads().iter().any(|p| p.first() == Some(&positive))
            || is_clear_confirmation(response.lines());

        if confirmed {
            info!("Trouble codes cleared");
        } else {
            warn!("Clear not confirmed by adapter: {:?}", response.lines());
            self.log.record(LogKind::Error, "clear DTCs not confirmed");
        }
        Ok(confirmed)
    }

    /// Mode 01 reading of one catalog PID
    pub async fn query_pid(&self, pid: u8) -> Result<PidReading, ServiceError> {
        let definition = ObdPid::lookup(pid).ok_or(ServiceError::UnknownPid(pid))?;
        let command = AdapterCommand::new(definition.command()).with_timeout(self.adapter.pid_timeout());
        let response = self.request(command).await?;

        let mut failure = DecodeError::NoData;
        for message in messages(&response)? {
            match decode_pid_message(definition, &message) {
                Ok(reading) => return Ok(reading),
                Err(e) => failure = e,
            }
        }
        Err(failure.into())
    }

    /// Readings for several PIDs. PIDs that cannot be read are left out;
    /// transport failures abort the snapshot.
    pub async fn query_pids(&self, pids: &[u8]) -> Result<BTreeMap<u8, PidReading>, ServiceError> {
        let mut readings = BTreeMap::new();
        for &pid in pids {
            match self.query_pid(pid).await {
                Ok(reading) => {
                    readings.insert(pid, reading);
                }
                Err(e @ (ServiceError::Session(_) | ServiceError::NotReady(_))) => return Err(e),
                Err(e) => debug!("PID {:02X} unavailable: {}", pid, e),
            }
        }
        Ok(readings)
    }

    /// Supported Mode 01 PIDs from the `0100`, `0120`, ... bitmaps, following
    /// the chain while the next range is flagged as supported
    pub async fn supported_pids(&self) -> Result<Vec<u8>, ServiceError> {
        let mut supported = Vec::new();
        let mut base = 0x00u8;

        loop {
            let reading = match self.query_pid(base).await {
                Ok(reading) => reading,
                Err(ServiceError::Decode(e)) if base != 0x00 => {
                    debug!("Range {:02X} not answered: {}", base, e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let range = decode_support_bitmap(&reading.raw_bytes, base);
            supported.extend_from_slice(&range);

            match base.checked_add(0x20) {
                Some(next) if range.contains(&next) && ObdPid::lookup(next).is_some() => base = next,
                _ => break,
            }
        }

        info!("Vehicle supports {} PID(s)", supported.len());
        Ok(supported)
    }

    async fn vehicle_message(&self, info: u8) -> Result<Vec<Vec<u8>>, ServiceError> {
        let command = AdapterCommand::new(format!("{:02X}{:02X}", mode::VEHICLE_INFO, info))
            .with_timeout(self.adapter.info_timeout());
        let response = self.request(command).await?;
        Ok(messages(&response)?)
    }

    async fn vehicle_text(&self, info: u8) -> Result<String, ServiceError> {
        let mut failure = DecodeError::NoData;
        for message in self.vehicle_message(info).await? {
            match decode_mode09_text(&message, info) {
                Ok(text) => return Ok(text),
                Err(e) => failure = e,
            }
        }
        Err(failure.into())
    }

    /// Mode 09 VIN
    pub async fn read_vin(&self) -> Result<String, ServiceError> {
        let mut failure = DecodeError::NoData;
        for message in self.vehicle_message(info_type::VIN).await? {
            match decode_vin_message(&message) {
                Ok(vin) => return Ok(vin),
                Err(e) => failure = e,
            }
        }
        Err(failure.into())
    }

    /// VIN, calibration ID, CVN and ECU name; fields the vehicle does not
    /// answer stay empty
    pub async fn read_vehicle_info(&self) -> Result<VehicleInfo, ServiceError> {
        let vin = optional(self.read_vin().await)?;
        let calibration_id = optional(self.vehicle_text(info_type::CALIBRATION_ID).await)?;
        let cvn = optional(self.cvn().await)?;
        let ecu_name = optional(self.vehicle_text(info_type::ECU_NAME).await)?;

        Ok(VehicleInfo {
            vin,
            calibration_id,
            cvn,
            ecu_name,
        })
    }

    async fn cvn(&self) -> Result<String, ServiceError> {
        let mut failure = DecodeError::NoData;
        for message in self.vehicle_message(info_type::CVN).await? {
            match decode_mode09_hex(&message, info_type::CVN) {
                Ok(cvn) => return Ok(cvn),
                Err(e) => failure = e,
            }
        }
        Err(failure.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::AdapterFamily;
    use obd_session::{Reply, SimulatedAdapter};
    use std::time::Duration;

    async fn ready(adapter: &SimulatedAdapter) -> ObdService {
        let service = ObdService::new(&ObdConfig::default());
        service.attach(adapter.start()).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_connect_runs_init_sequence() {
        let adapter = SimulatedAdapter::new();
        let service = ready(&adapter).await;

        assert_eq!(service.state(), ServiceState::Ready);
        assert_eq!(
            adapter.commands(),
            vec!["ATE0", "ATL0", "ATS1", "ATH1", "ATSP0", "STI", "ATI", "AT@1"]
        );
        // Bare adapter answers OK / ? to everything
        assert_eq!(service.device_profile(), Some(DeviceProfile::default()));
    }

    #[tokio::test]
    async fn test_identification_can_be_disabled() {
        let mut config = ObdConfig::default();
        config.adapter.identify = false;
        let adapter = SimulatedAdapter::new();
        let service = ObdService::new(&config);
        service.attach(adapter.start()).await.unwrap();

        assert_eq!(adapter.commands(), vec!["ATE0", "ATL0", "ATS1", "ATH1", "ATSP0"]);
        assert_eq!(service.device_profile(), None);
    }

    #[tokio::test]
    async fn test_identifies_clone_adapter() {
        let service = ready(&SimulatedAdapter::vehicle()).await;
        let profile = service.device_profile().unwrap();

        assert_eq!(profile.family, AdapterFamily::ElmClone);
        assert_eq!(profile.firmware_version, "v1.5");
        assert_eq!(profile.device_name, "OBDII to RS232 Interpreter");
        assert!(service.log().lines().iter().any(|line| line.contains("adapter OBDII")));

        service.disconnect().await;
        assert_eq!(service.device_profile(), None);
    }

    #[tokio::test]
    async fn test_identifies_stn_adapter() {
        let adapter = SimulatedAdapter::new()
            .on("STI", Reply::lines(["STN2255 v5.6.19"]))
            .on("STDI", Reply::lines(["OBDLink MX+ r2.1"]))
            .on("STMFR", Reply::lines(["OBD Solutions LLC"]));
        let service = ready(&adapter).await;

        let profile = service.device_profile().unwrap();
        assert_eq!(profile.family, AdapterFamily::Obdlink);
        assert_eq!(profile.device_name, "OBDLink MX+");
        assert!(profile.is_high_performance());
        assert!(!adapter.commands().contains(&"ATI".to_string()));
    }

    #[tokio::test]
    async fn test_silent_identification_is_not_fatal() {
        let mut config = ObdConfig::default();
        config.adapter.identify_timeout_ms = 50;
        let adapter = SimulatedAdapter::new()
            .on("STI", Reply::Silent)
            .on("ATI", Reply::lines(["ELM327 v2.2"]));
        let service = ObdService::new(&config);
        service.attach(adapter.start()).await.unwrap();

        assert_eq!(service.state(), ServiceState::Ready);
        assert_eq!(service.device_profile().unwrap().family, AdapterFamily::Elm327);
    }

    #[tokio::test]
    async fn test_link_lost_during_identification() {
        let adapter = SimulatedAdapter::new().on("STI", Reply::Close);
        let service = ObdService::new(&ObdConfig::default());

        assert!(service.attach(adapter.start()).await.is_err());
        assert_eq!(service.state(), ServiceState::Disconnected);
        assert_eq!(service.device_profile(), None);
    }

    #[tokio::test]
    async fn test_requests_rejected_before_connect() {
        let service = ObdService::new(&ObdConfig::default());
        let err = service.read_stored_dtcs().await.unwrap_err();
        assert!(matches!(err, ServiceError::NotReady(ServiceState::Idle)));
    }

    #[tokio::test]
    async fn test_stored_and_pending_dtcs() {
        let service = ready(&SimulatedAdapter::vehicle()).await;

        let stored: Vec<_> = service.read_stored_dtcs().await.unwrap();
        let codes: Vec<_> = stored.iter().map(|d| d.code()).collect();
        assert_eq!(codes, vec!["P0300", "P0171"]);

        let pending = service.read_pending_dtcs().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].code(), "P0420");
        assert_eq!(pending[0].status(), DtcStatus::Pending);
    }

    #[tokio::test]
    async fn test_no_data_means_no_codes() {
        let adapter = SimulatedAdapter::new().on("03", Reply::lines(["NO DATA"]));
        let service = ready(&adapter).await;
        assert!(service.read_stored_dtcs().await.unwrap().is_empty());
        assert_eq!(service.state(), ServiceState::Ready);
    }

    #[tokio::test]
    async fn test_dtcs_across_ecus_deduplicated() {
        let adapter = SimulatedAdapter::new().on(
            "03",
            Reply::lines(["7E8 04 43 01 03 00", "7E9 06 43 02 03 00 C0 01"]),
        );
        let service = ready(&adapter).await;
        let codes: Vec<String> = service
            .read_stored_dtcs()
            .await
            .unwrap()
            .iter()
            .map(|d| d.to_string())
            .collect();
        assert_eq!(codes, vec!["P0300", "U0001"]);
    }

    #[tokio::test]
    async fn test_clear_dtcs() {
        let service = ready(&SimulatedAdapter::vehicle()).await;
        assert!(service.clear_dtcs().await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_dtcs_soft_failure() {
        let adapter = SimulatedAdapter::new().on("04", Reply::lines(["7E8 03 7F 04 22"]));
        let service = ready(&adapter).await;
        assert!(!service.clear_dtcs().await.unwrap());
        assert_eq!(service.state(), ServiceState::Ready);
    }

    #[tokio::test]
    async fn test_query_pid() {
        let service = ready(&SimulatedAdapter::vehicle()).await;

        let rpm = service.query_pid(0x0C).await.unwrap();
        assert!((rpm.value - 1726.0).abs() < 0.01);
        assert_eq!(rpm.formatted, "1726 rpm");

        let coolant = service.query_pid(0x05).await.unwrap();
        assert!((coolant.value - 75.0).abs() < 0.01);

        assert!(matches!(service.query_pid(0xE5).await, Err(ServiceError::UnknownPid(0xE5))));
        assert!(matches!(
            service.query_pid(0x10).await,
            Err(ServiceError::Decode(DecodeError::NoData))
        ));
    }

    #[tokio::test]
    async fn test_query_pid_without_headers() {
        let adapter = SimulatedAdapter::new().on("010D", Reply::lines(["41 0D 28"]));
        let service = ready(&adapter).await;
        assert_eq!(service.query_pid(0x0D).await.unwrap().value, 40.0);
    }

    #[tokio::test]
    async fn test_query_pids_skips_unsupported() {
        let service = ready(&SimulatedAdapter::vehicle()).await;
        let readings = service.query_pids(&[0x0C, 0x10, 0x0D]).await.unwrap();
        assert_eq!(readings.keys().copied().collect::<Vec<_>>(), vec![0x0C, 0x0D]);
    }

    #[tokio::test]
    async fn test_supported_pids_chain() {
        let service = ready(&SimulatedAdapter::vehicle()).await;
        let supported = service.supported_pids().await.unwrap();

        assert!(supported.contains(&0x0C));
        assert!(supported.contains(&0x21));
        assert!(supported.contains(&0x42));
        assert!(!supported.contains(&0x02));
        assert!(!supported.contains(&0x60));
    }

    #[tokio::test]
    async fn test_vehicle_info() {
        let service = ready(&SimulatedAdapter::vehicle()).await;
        let info = service.read_vehicle_info().await.unwrap();

        assert_eq!(info.vin.as_deref(), Some("1G1JC5444R7252367"));
        assert_eq!(info.calibration_id.as_deref(), Some("12639540"));
        assert_eq!(info.cvn.as_deref(), Some("1791BC82"));
        assert_eq!(info.ecu_name.as_deref(), Some("ECM-EngineControl"));
        assert_eq!(info.vin_details().unwrap().model_year, Some(2024));
    }

    #[tokio::test]
    async fn test_vehicle_info_partial() {
        let adapter = SimulatedAdapter::new().on(
            "0902",
            Reply::lines([
                "7E8 10 14 49 02 01 31 47 31",
                "7E8 21 4A 43 35 34 34 34 52",
                "7E8 22 37 32 35 32 33 36 37",
            ]),
        );
        let service = ready(&adapter).await;
        let info = service.read_vehicle_info().await.unwrap();
        assert!(info.vin.is_some());
        assert_eq!(info.calibration_id, None);
        assert_eq!(info.ecu_name, None);
    }

    #[tokio::test]
    async fn test_timeout_requires_reconnect() {
        let adapter = SimulatedAdapter::new().on("03", Reply::Silent);
        let mut config = ObdConfig::default();
        config.adapter.dtc_timeout_ms = 50;
        let service = ObdService::new(&config);
        service.attach(adapter.start()).await.unwrap();

        let err = service.read_stored_dtcs().await.unwrap_err();
        assert!(err.is_transport_failure());
        assert_eq!(service.state(), ServiceState::Disconnected);
        assert_eq!(service.session().state(), ConnectionState::Connected);
        assert!(matches!(
            service.query_pid(0x0D).await,
            Err(ServiceError::NotReady(ServiceState::Disconnected))
        ));

        service.attach(SimulatedAdapter::vehicle().start()).await.unwrap();
        assert_eq!(service.state(), ServiceState::Ready);
    }

    #[tokio::test]
    async fn test_busy_while_in_flight() {
        let adapter = SimulatedAdapter::new()
            .on("010D", Reply::delayed(Duration::from_millis(50), Reply::lines(["41 0D 28"])));
        let service = ready(&adapter).await;
        let mut states = service.subscribe();

        let (reading, _) = tokio::join!(service.query_pid(0x0D), async {
            states.changed().await.unwrap();
            assert_eq!(*states.borrow_and_update(), ServiceState::Busy);
        });
        assert_eq!(reading.unwrap().value, 40.0);
        assert_eq!(service.state(), ServiceState::Ready);
    }

    #[tokio::test]
    async fn test_raw_passthrough_and_log() {
        let service = ready(&SimulatedAdapter::vehicle()).await;
        let lines = service.send_raw("ATRV").await.unwrap();
        assert_eq!(lines, vec!["12.6V"]);
        assert!(service.log().lines().contains(&"<< 12.6V".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect_returns_to_idle() {
        let service = ready(&SimulatedAdapter::new()).await;
        service.disconnect().await;
        assert_eq!(service.state(), ServiceState::Idle);
        assert_eq!(service.session().state(), ConnectionState::Disconnected);
    }
}
