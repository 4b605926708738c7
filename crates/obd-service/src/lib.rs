//! OBD-II Diagnostic Service
//!
//! Diagnostic use-cases on top of an [`obd_session::AdapterSession`]: stored
//! and pending trouble codes, clearing codes, live PIDs, supported-PID
//! discovery and Mode 09 vehicle identification.

mod config;
mod error;
mod service;
mod state;

pub use config::{AdapterConfig, LogConfig, ObdConfig, PollingConfig};
pub use error::{FailureKind, ServiceError};
pub use service::ObdService;
pub use state::ServiceState;
