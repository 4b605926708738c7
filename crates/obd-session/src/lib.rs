//! ELM327 Adapter Session
//!
//! Owns the byte stream to an ELM327-class adapter (TCP socket or Bluetooth
//! serial device) and turns text commands into correlated responses, one at
//! a time. Multi-frame ISO-TP output is reassembled on the way through.

mod command;
mod config;
mod error;
mod link;
mod session;
mod sim;
mod state;

pub use command::{AdapterCommand, AdapterResponse, Terminator};
pub use config::{IsoTpMode, LinkConfig, LinkKind, SessionConfig};
pub use error::{ConnectError, LinkError, SessionError};
pub use link::{Inbound, LogSink, Target, TransportLink};
pub use session::AdapterSession;
pub use sim::{Reply, SimEvent, SimulatedAdapter};
pub use state::ConnectionState;
