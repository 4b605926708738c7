//! OBD-II Diagnostics CLI
//!
//! Runs one diagnostic command against a WiFi/Bluetooth ELM327 adapter or
//! the built-in simulated vehicle, printing results as JSON.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use obd_protocol::{elm, ObdPid};
use obd_scheduler::{PidPoller, PollOutcome};
use obd_service::{LogConfig, ObdConfig, ObdService};
use obd_session::SimulatedAdapter;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Read stored trouble codes (Mode 03)
    Dtcs,

    /// Read pending trouble codes (Mode 07)
    Pending,

    /// Clear trouble codes and the MIL (Mode 04)
    Clear,

    /// Read VIN, calibration ID, CVN and ECU name (Mode 09)
    Info,

    /// List the PIDs the vehicle supports
    Pids,

    /// Show the identified adapter chip and its limits
    Adapter,

    /// Read PID(s) once, by name (ENGINE_RPM) or hex code (0C)
    Read {
        #[arg(required = true)]
        pids: Vec<String>,
    },

    /// Poll PID(s) and print every cycle
    Poll {
        /// Defaults to the configured live data PIDs
        pids: Vec<String>,

        /// Stop after this many cycles
        #[arg(long, default_value = "10")]
        cycles: u64,
    },

    /// Send a raw adapter command
    Raw {
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Print the adapter traffic log of this session
    Log,
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log filter")?;

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
    .context("Failed to set tracing subscriber")
}

/// Resolve a PID argument against the catalog
pub fn parse_pid(text: &str) -> Result<u8> {
    match ObdPid::find(text) {
        Some(pid) => Ok(pid.code),
        None => bail!("Unknown PID: {}", text),
    }
}

fn parse_pids(texts: &[String]) -> Result<Vec<u8>> {
    texts.iter().map(|text| parse_pid(text)).collect()
}

/// Connect and initialize the adapter
pub async fn open(config: &ObdConfig, simulate: bool) -> Result<Arc<ObdService>> {
    let service = ObdService::new(config);
    if simulate {
        info!("Using simulated vehicle");
        service
            .attach(SimulatedAdapter::vehicle().start())
            .await
            .context("Simulated adapter failed to initialize")?;
    } else {
        let target = config.link.target();
        service
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", target))?;
    }
    Ok(Arc::new(service))
}

fn emit<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Run one command, writing JSON to `out`
pub async fn execute<W: Write>(
    service: &Arc<ObdService>,
    config: &ObdConfig,
    command: &Command,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Dtcs => {
            let codes = service.read_stored_dtcs().await?;
            emit(out, &json!({ "stored": codes }))
        }
        Command::Pending => {
            let codes = service.read_pending_dtcs().await?;
            emit(out, &json!({ "pending": codes }))
        }
        Command::Clear => {
            let cleared = service.clear_dtcs().await?;
            if !cleared {
                warn!("Adapter did not confirm the clear; check ignition is on");
            }
            emit(out, &json!({ "cleared": cleared }))
        }
        Command::Info => {
            let info = service.read_vehicle_info().await?;
            let details = info.vin_details();
            emit(out, &json!({ "vehicle": info, "vin_details": details }))
        }
        Command::Adapter => {
            let voltage = service.send_raw(elm::READ_VOLTAGE).await?;
            emit(out, &json!({ "adapter": service.device_profile(), "voltage": voltage.first() }))
        }
        Command::Pids => {
            let supported: Vec<_> = service
                .supported_pids()
                .await?
                .into_iter()
                .map(|pid| {
                    let name = ObdPid::lookup(pid).map(|p| p.name);
                    json!({ "pid": format!("{:02X}", pid), "name": name })
                })
                .collect();
            emit(out, &json!({ "supported": supported }))
        }
        Command::Read { pids } => {
            let readings = service.query_pids(&parse_pids(pids)?).await?;
            let readings: Vec<_> = readings.into_values().collect();
            emit(out, &json!({ "readings": readings }))
        }
        Command::Poll { pids, cycles } => poll(service, config, pids, *cycles, out).await,
        Command::Raw { text } => {
            let text = text.join(" ");
            let lines = service.send_raw(&text).await?;
            emit(out, &json!({ "command": text, "lines": lines }))
        }
        Command::Log => emit(out, &json!({ "log": service.log().lines() })),
    }
}

async fn poll<W: Write>(
    service: &Arc<ObdService>,
    config: &ObdConfig,
    pids: &[String],
    cycles: u64,
    out: &mut W,
) -> Result<()> {
    let mut poller = PidPoller::new(service.clone(), &config.polling).with_max_cycles(cycles);
    if !pids.is_empty() {
        poller = poller.with_pids(&parse_pids(pids)?);
    }

    let handle = poller.spawn();
    let mut snapshots = handle.snapshots();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                serde_json::to_writer(&mut *out, &snapshot)?;
                writeln!(out)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                handle.stop();
                break;
            }
        }
    }

    match handle.join().await? {
        PollOutcome::Exhausted { .. } => warn!("Vehicle supports none of the requested PIDs"),
        outcome => info!("Polling ended: {:?}", outcome),
    }
    Ok(())
}
