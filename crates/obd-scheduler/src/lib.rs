//! Live PID Polling
//!
//! Cycles through a set of Mode 01 PIDs on an [`obd_service::ObdService`],
//! publishing the latest value of each PID after every cycle. PIDs the
//! vehicle answers with `NO DATA` are dropped from the rotation.

mod poller;

pub use poller::{PidDisplayState, PidPoller, PollError, PollHandle, PollOutcome, PollSnapshot};
