//! PID Poller Implementation

use obd_protocol::{ObdPid, PidReading};
use obd_service::{FailureKind, ObdService, PollingConfig, ServiceError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Latest value of one polled PID
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PidDisplayState {
    pub pid: u8,
    pub name: &'static str,
    pub unit: &'static str,
    /// `None` until sampled, or when the last reply could not be decoded
    pub value: Option<f64>,
    pub formatted: Option<String>,
    /// Cleared once the vehicle answers `NO DATA`
    pub supported: bool,
    /// Unix time of the last successful sample
    pub updated_ms: Option<u64>,
}

impl PidDisplayState {
    fn new(pid: u8) -> Self {
        match ObdPid::lookup(pid) {
            Some(definition) => Self {
                pid,
                name: definition.name,
                unit: definition.unit,
                value: None,
                formatted: None,
                supported: true,
                updated_ms: None,
            },
            None => Self {
                pid,
                name: "UNKNOWN",
                unit: "",
                value: None,
                formatted: None,
                supported: false,
                updated_ms: None,
            },
        }
    }

    fn update(&mut self, reading: PidReading) {
        self.value = Some(reading.value);
        self.formatted = Some(reading.formatted);
        self.updated_ms = Some(now_ms());
    }

    fn invalidate(&mut self) {
        self.value = None;
        self.formatted = None;
    }
}

/// Values published after each completed cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollSnapshot {
    /// Completed cycles so far
    pub cycle: u64,
    pub values: BTreeMap<u8, PidDisplayState>,
}

/// How a polling run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// `stop()` was called or the handle was dropped
    Stopped { cycles: u64 },
    /// The cycle limit was reached
    Completed { cycles: u64 },
    /// None of the PIDs is supported by the vehicle
    Exhausted { cycles: u64 },
}

#[derive(Debug, Error)]
pub enum PollError {
    /// Transport failure; the service needs a reconnect
    #[error("Polling aborted: {0}")]
    Service(#[from] ServiceError),

    #[error("Polling task failed: {0}")]
    Task(#[from] JoinError),
}

/// Handle to a running poller
pub struct PollHandle {
    stop: watch::Sender<bool>,
    snapshots: watch::Receiver<PollSnapshot>,
    task: JoinHandle<Result<PollOutcome, ServiceError>>,
}

impl PollHandle {
    /// Receiver of the per-cycle snapshots
    pub fn snapshots(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshots.clone()
    }

    /// Most recent snapshot
    pub fn latest(&self) -> PollSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Ask the poller to stop. An in-flight request is abandoned.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the poller to end
    pub async fn join(self) -> Result<PollOutcome, PollError> {
        // Keep the stop sender alive until the task ends
        let _stop = self.stop;
        Ok(self.task.await??)
    }

    /// Stop and wait
    pub async fn shutdown(self) -> Result<PollOutcome, PollError> {
        self.stop();
        self.join().await
    }
}

/// Resolves once stop is requested or the handle is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Cycles through PIDs on a service
pub struct PidPoller {
    service: Arc<ObdService>,
    pids: Vec<u8>,
    interval: Duration,
    inter_pid_delay: Duration,
    max_cycles: Option<u64>,
}

impl PidPoller {
    /// Poll the configured PIDs at the configured (clamped) interval
    pub fn new(service: Arc<ObdService>, config: &PollingConfig) -> Self {
        Self {
            service,
            pids: config.pids.clone(),
            interval: config.interval(),
            inter_pid_delay: config.inter_pid_delay(),
            max_cycles: None,
        }
    }

    /// Poll these PIDs instead, in this order
    pub fn with_pids(mut self, pids: &[u8]) -> Self {
        self.pids = Vec::with_capacity(pids.len());
        for &pid in pids {
            if !self.pids.contains(&pid) {
                self.pids.push(pid);
            }
        }
        self
    }

    /// End after `cycles` complete cycles
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn pid_count(&self) -> usize {
        self.pids.len()
    }

    /// Start polling on a background task
    pub fn spawn(self) -> PollHandle {
        let initial = PollSnapshot {
            cycle: 0,
            values: self.pids.iter().map(|&pid| (pid, PidDisplayState::new(pid))).collect(),
        };
        let (snapshot_tx, snapshots) = watch::channel(initial.clone());
        let (stop, stop_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(initial, snapshot_tx, stop_rx));
        PollHandle { stop, snapshots, task }
    }

    async fn run(
        self,
        mut snapshot: PollSnapshot,
        publish: watch::Sender<PollSnapshot>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<PollOutcome, ServiceError> {
        info!(
            "Polling {} PID(s) every {:?}",
            self.pids.len(),
            self.interval
        );

        loop {
            let mut polled = 0usize;
            for &pid in &self.pids {
                let supported = snapshot.values.get(&pid).map_or(false, |s| s.supported);
                if !supported {
                    continue;
                }

                if polled > 0 && !self.inter_pid_delay.is_zero() {
                    tokio::select! {
                        _ = stop_requested(&mut stop) => return Ok(self.stopped(&snapshot)),
                        _ = tokio::time::sleep(self.inter_pid_delay) => {}
                    }
                }
                polled += 1;

                let result = tokio::select! {
                    _ = stop_requested(&mut stop) => return Ok(self.stopped(&snapshot)),
                    result = self.service.query_pid(pid) => result,
                };

                let Some(state) = snapshot.values.get_mut(&pid) else {
                    continue;
                };
                match result {
                    Ok(reading) => state.update(reading),
                    Err(e) if matches!(e.kind(), FailureKind::NoData | FailureKind::Unsupported) => {
                        warn!("PID {:02X} not supported, removed from polling", pid);
                        state.supported = false;
                        state.invalidate();
                    }
                    Err(e @ (ServiceError::Session(_) | ServiceError::NotReady(_))) => {
                        warn!("Polling stopped after {} cycle(s): {}", snapshot.cycle, e);
                        return Err(e);
                    }
                    Err(e) => {
                        debug!("PID {:02X} reading discarded: {}", pid, e);
                        state.invalidate();
                    }
                }
            }

            snapshot.cycle += 1;
            publish.send_replace(snapshot.clone());

            if polled == 0 {
                warn!("No supported PIDs left to poll");
                return Ok(PollOutcome::Exhausted { cycles: snapshot.cycle });
            }
            if self.max_cycles.is_some_and(|max| snapshot.cycle >= max) {
                info!("Polling completed after {} cycle(s)", snapshot.cycle);
                return Ok(PollOutcome::Completed { cycles: snapshot.cycle });
            }

            tokio::select! {
                _ = stop_requested(&mut stop) => return Ok(self.stopped(&snapshot)),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    fn stopped(&self, snapshot: &PollSnapshot) -> PollOutcome {
        info!("Polling stopped after {} cycle(s)", snapshot.cycle);
        PollOutcome::Stopped { cycles: snapshot.cycle }
    }
}
