//! Adapter Session
//!
//! One command in flight at a time. The link and the ISO-TP assembler sit
//! together behind a single `tokio::sync::Mutex`, whose waiters are served
//! in arrival order, so concurrent callers queue instead of interleaving.
//!
//! A command that times out or whose future is dropped leaves the link
//! dirty: the next command first drains output up to the adapter prompt.

use crate::command::{AdapterCommand, AdapterResponse, Terminator};
use crate::config::{IsoTpMode, LinkConfig, SessionConfig};
use crate::error::{ConnectError, LinkError, SessionError};
use crate::link::{Inbound, LogSink, Target, TransportLink};
use crate::state::ConnectionState;
use obd_protocol::{is_frame_line, IsoTpAssembler};
use ring_buffer::LogKind;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Whether `line` goes to the ISO-TP assembler
fn routes_to_assembler(mode: IsoTpMode, line: &str, collecting: bool) -> bool {
    match mode {
        IsoTpMode::Auto => is_frame_line(line, collecting),
        IsoTpMode::Always => !line.contains(':'),
        IsoTpMode::Never => false,
    }
}

/// State guarded by the session lock
struct SessionCore {
    link: TransportLink,
    assembler: IsoTpAssembler,
    /// Output of an earlier command may still be on the wire
    dirty: bool,
}

impl SessionCore {
    async fn settle(&mut self, budget: Duration) -> Result<(), LinkError> {
        match self.link.drain(budget).await {
            Ok(discarded) => {
                debug!("Flushed {} stale line(s) before next command", discarded);
                Ok(())
            }
            Err(LinkError::Timeout(_)) => {
                warn!("Adapter did not return to the prompt within {:?}", budget);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange(
        &mut self,
        command: &AdapterCommand,
        timeout: Duration,
        config: &SessionConfig,
    ) -> Result<AdapterResponse, LinkError> {
        if self.dirty {
            self.settle(config.drain_timeout()).await?;
        }
        let stray = self.link.discard_buffered();
        if stray > 0 {
            debug!("Discarded {} unsolicited item(s)", stray);
        }
        self.assembler.reset();
        self.dirty = true;

        let started = Instant::now();
        let deadline = started + timeout;
        self.link.write_line(command.text()).await?;

        let mut response = AdapterResponse::new(command.text());
        let mut prompt_seen = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.link.read_line(remaining).await? {
                Inbound::Prompt if self.assembler.is_collecting() => {
                    debug!("Prompt before '{}' finished its multi-frame message", command.text());
                    prompt_seen = true;
                    continue;
                }
                Inbound::Prompt => {
                    prompt_seen = true;
                    break;
                }
                Inbound::Line(line) => line,
            };

            if routes_to_assembler(config.iso_tp, &line, self.assembler.is_collecting()) {
                if let Some(result) = self.assembler.feed(&line) {
                    response.push_payload(result.payload);
                }
            }
            response.push_line(line);

            if self.assembler.is_collecting() {
                continue;
            }
            if prompt_seen {
                break;
            }
            if let Terminator::LineCount(count) = command.terminator() {
                if response.lines().len() >= count {
                    break;
                }
            }
        }

        if prompt_seen {
            self.dirty = false;
        }
        response.finish(prompt_seen, started.elapsed());
        Ok(response)
    }
}

/// Serialized command exchange with one adapter
pub struct AdapterSession {
    config: SessionConfig,
    state: watch::Sender<ConnectionState>,
    core: Mutex<Option<SessionCore>>,
    /// Stops the link's reader without waiting for the session lock
    reader_abort: StdMutex<Option<AbortHandle>>,
    sink: Option<Arc<dyn LogSink>>,
}

impl AdapterSession {
    pub fn new(config: SessionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state,
            core: Mutex::new(None),
            reader_abort: StdMutex::new(None),
            sink: None,
        }
    }

    /// Mirror traffic and lifecycle events into `sink`
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn mirror(&self, kind: LogKind, text: &str) {
        if let Some(sink) = &self.sink {
            sink.mirror(kind, text);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Connection state {} -> {}", previous, next);
        }
    }

    fn store_abort(&self, handle: Option<AbortHandle>) -> Option<AbortHandle> {
        let mut slot = self.reader_abort.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *slot, handle)
    }

    /// Connect using a link configuration
    pub async fn connect_with(&self, link: &LinkConfig) -> Result<(), SessionError> {
        self.connect(&link.target(), link.connect_timeout()).await
    }

    /// Open a link to `target`: Disconnected -> Connecting -> Connected, or
    /// -> Error on failure. Reconnecting from Error replaces the dead link.
    pub async fn connect(&self, target: &Target, connect_timeout: Duration) -> Result<(), SessionError> {
        let mut core = self.core.lock().await;
        if core.is_some() && self.state().is_connected() {
            return Err(ConnectError::AlreadyConnected.into());
        }
        if let Some(mut stale) = core.take() {
            stale.link.disconnect().await;
        }

        self.set_state(ConnectionState::Connecting);
        self.mirror(LogKind::Info, &format!("connecting to {}", target));

        match TransportLink::connect(target, connect_timeout).await {
            Ok(link) => {
                self.install(&mut core, link);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", target, e);
                self.mirror(LogKind::Error, &e.to_string());
                self.set_state(ConnectionState::Error);
                Err(e.into())
            }
        }
    }

    /// Adopt an already open link (simulated adapters, custom media)
    pub async fn attach(&self, link: TransportLink) -> Result<(), SessionError> {
        let mut core = self.core.lock().await;
        if core.is_some() && self.state().is_connected() {
            return Err(ConnectError::AlreadyConnected.into());
        }
        if let Some(mut stale) = core.take() {
            stale.link.disconnect().await;
        }
        self.install(&mut core, link);
        Ok(())
    }

    fn install(&self, core: &mut Option<SessionCore>, mut link: TransportLink) {
        link.set_log_sink(self.sink.clone());
        self.store_abort(Some(link.abort_handle()));
        *core = Some(SessionCore {
            link,
            assembler: IsoTpAssembler::with_max_payload(self.config.max_payload),
            dirty: false,
        });
        self.set_state(ConnectionState::Connected);
        self.mirror(LogKind::Info, "connected");
        info!("Adapter session connected");
    }

    /// Release the link. Always ends Disconnected; a no-op when already
    /// disconnected. A command blocked on the link fails promptly.
    pub async fn disconnect(&self) {
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if let Some(handle) = self.store_abort(None) {
            handle.abort();
        }

        let mut core = self.core.lock().await;
        if let Some(mut released) = core.take() {
            released.link.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);

        if previous != ConnectionState::Disconnected {
            self.mirror(LogKind::Info, "disconnected");
            info!("Adapter session disconnected");
        }
    }

    /// Send `command` and collect its response.
    ///
    /// Fails immediately unless connected. Waits its turn behind earlier
    /// callers. A timeout leaves the connection state untouched; a link
    /// failure moves it to Error.
    pub async fn send_and_await(
        &self,
        command: impl Into<AdapterCommand>,
    ) -> Result<AdapterResponse, SessionError> {
        let command = command.into();
        if !self.state().is_connected() {
            return Err(SessionError::NotConnected);
        }
        let timeout = command.timeout().unwrap_or_else(|| self.config.default_timeout());

        let mut guard = self.core.lock().await;
        let core = match guard.as_mut() {
            Some(core) if self.state().is_connected() => core,
            _ => return Err(SessionError::NotConnected),
        };

        match core.exchange(&command, timeout, &self.config).await {
            Ok(response) => Ok(response),
            Err(LinkError::Timeout(_)) => {
                warn!("No response to '{}' within {:?}", command.text(), timeout);
                self.mirror(LogKind::Error, &format!("timeout waiting for {}", command.text()));
                Err(SessionError::Timeout {
                    command: command.text().to_string(),
                    timeout,
                })
            }
            Err(err) => {
                let lost = self.state.send_if_modified(|state| {
                    if *state == ConnectionState::Connected {
                        *state = ConnectionState::Error;
                        true
                    } else {
                        false
                    }
                });
                if !lost {
                    // disconnect() tore the link down underneath us
                    return Err(SessionError::NotConnected);
                }
                error!("Adapter link lost during '{}': {}", command.text(), err);
                self.mirror(LogKind::Error, &format!("link lost: {}", err));
                Err(SessionError::LinkLost(err))
            }
        }
    }

    /// Send a raw text line with the default timeout
    pub async fn send_text(&self, text: &str) -> Result<AdapterResponse, SessionError> {
        self.send_and_await(AdapterCommand::new(text)).await
    }
}

impl Default for AdapterSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
