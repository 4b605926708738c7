//! Bounded Ring Buffer
//!
//! Capacity-bounded, lock-protected ring buffer and the adapter traffic log
//! built on it. Appends evict the oldest entry once full; readers always get
//! an owned snapshot.

mod buffer;
mod log;

pub use buffer::{RingBuffer, DEFAULT_CAPACITY};
pub use log::{DiagnosticLog, LogEntry, LogKind};
