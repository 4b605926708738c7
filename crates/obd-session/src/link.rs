//! Byte link to the adapter
//!
//! A background reader task splits the incoming stream into lines on `\r`
//! or `\n` and reports the `>` prompt as its own item. When the stream ends,
//! fails, or the reader is aborted, the channel closes and any blocked read
//! returns [`LinkError::Closed`].

use crate::error::{ConnectError, LinkError};
use ring_buffer::{DiagnosticLog, LogKind};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Lines buffered between the reader task and the session
const INBOUND_CAPACITY: usize = 256;

/// Bound on flushing the write half during disconnect
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

/// Adapter address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// WiFi adapter socket
    Tcp { host: String, port: u16 },
    /// Bluetooth SPP adapter through its serial device node
    Bluetooth { device: String, baud_rate: u32 },
}

impl Target {
    /// Pick the medium with an explicit flag. For Bluetooth, `address` is
    /// the serial device bound to the adapter and `port` is ignored.
    pub fn select(address: &str, port: u16, is_bluetooth: bool, baud_rate: u32) -> Self {
        if is_bluetooth {
            Target::Bluetooth {
                device: address.to_string(),
                baud_rate,
            }
        } else {
            Target::Tcp {
                host: address.to_string(),
                port,
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Target::Bluetooth { device, baud_rate } => write!(f, "bluetooth:{}@{}", device, baud_rate),
        }
    }
}

/// Receives a copy of all link traffic for a debug console
pub trait LogSink: Send + Sync {
    fn mirror(&self, kind: LogKind, text: &str);
}

impl LogSink for DiagnosticLog {
    fn mirror(&self, kind: LogKind, text: &str) {
        self.record(kind, text);
    }
}

/// One item read from the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Non-empty, trimmed text line
    Line(String),
    /// The `>` prompt: the adapter is ready for the next command
    Prompt,
}

/// Line-buffered connection to one adapter
pub struct TransportLink {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    inbound: mpsc::Receiver<io::Result<Inbound>>,
    reader: JoinHandle<()>,
    sink: Option<Arc<dyn LogSink>>,
}

impl TransportLink {
    /// Open the medium named by `target`
    pub async fn connect(target: &Target, connect_timeout: Duration) -> Result<Self, ConnectError> {
        info!("Connecting to adapter at {}", target);

        match target {
            Target::Tcp { host, port } => {
                let address = format!("{}:{}", host, port);
                let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&address))
                    .await
                    .map_err(|_| ConnectError::Timeout {
                        target: target.to_string(),
                        timeout: connect_timeout,
                    })?
                    .map_err(|source| ConnectError::Unreachable {
                        target: target.to_string(),
                        source,
                    })?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not disable Nagle on {}: {}", address, e);
                }
                Ok(Self::attach(stream))
            }
            Target::Bluetooth { device, baud_rate } => {
                let port = tokio_serial::new(device.as_str(), *baud_rate)
                    .timeout(connect_timeout)
                    .open_native_async()
                    .map_err(|source| ConnectError::Serial {
                        device: device.clone(),
                        source,
                    })?;
                Ok(Self::attach(port))
            }
        }
    }

    /// Wrap an already open stream
    pub fn attach<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(read_loop(reader, tx));

        Self {
            writer: Box::new(writer),
            inbound,
            reader,
            sink: None,
        }
    }

    /// Mirror traffic into `sink`
    pub fn set_log_sink(&mut self, sink: Option<Arc<dyn LogSink>>) {
        self.sink = sink;
    }

    fn mirror(&self, kind: LogKind, text: &str) {
        if let Some(sink) = &self.sink {
            sink.mirror(kind, text);
        }
    }

    /// Handle that stops the reader task, failing blocked reads promptly
    pub fn abort_handle(&self) -> AbortHandle {
        self.reader.abort_handle()
    }

    /// Write `text` followed by a carriage return
    pub async fn write_line(&mut self, text: &str) -> Result<(), LinkError> {
        debug!("Adapter <- {}", text);
        self.mirror(LogKind::Sent, text);

        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(b'\r');

        let written = match self.writer.write_all(&frame).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.mirror(LogKind::Error, &format!("write failed: {}", e));
            return Err(LinkError::Io(e));
        }
        Ok(())
    }

    /// Next line or prompt, waiting at most `timeout`
    pub async fn read_line(&mut self, timeout: Duration) -> Result<Inbound, LinkError> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Err(_) => Err(LinkError::Timeout(timeout)),
            Ok(None) => Err(LinkError::Closed),
            Ok(Some(Err(e))) => {
                self.mirror(LogKind::Error, &format!("read failed: {}", e));
                Err(LinkError::Io(e))
            }
            Ok(Some(Ok(inbound))) => {
                if let Inbound::Line(line) = &inbound {
                    debug!("Adapter -> {}", line);
                    self.mirror(LogKind::Received, line);
                }
                Ok(inbound)
            }
        }
    }

    /// Discard output up to and including the next prompt; returns the
    /// number of lines thrown away
    pub async fn drain(&mut self, timeout: Duration) -> Result<usize, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut discarded = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.read_line(remaining).await {
                Ok(Inbound::Prompt) => return Ok(discarded),
                Ok(Inbound::Line(_)) => discarded += 1,
                Err(LinkError::Timeout(_)) => return Err(LinkError::Timeout(timeout)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop whatever is already buffered without waiting
    pub fn discard_buffered(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(item) = self.inbound.try_recv() {
            if let Ok(Inbound::Line(line)) = item {
                self.mirror(LogKind::Received, &line);
            }
            discarded += 1;
        }
        discarded
    }

    /// Close the stream and stop the reader
    pub async fn disconnect(&mut self) {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Shutdown of adapter stream failed: {}", e),
            Err(_) => warn!("Shutdown of adapter stream timed out"),
        }
        self.reader.abort();
        self.inbound.close();
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn take_line(line: &mut String) -> Option<String> {
    let text = line.trim().to_string();
    line.clear();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<io::Result<Inbound>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut line = String::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Adapter stream reached EOF");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("Adapter read failed: {}", e);
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        for &byte in &buf[..n] {
            let prompt = match byte {
                b'\r' | b'\n' => false,
                b'>' => true,
                // ELM clones pad output with NULs
                0 => continue,
                other => {
                    line.push(other as char);
                    continue;
                }
            };
            if let Some(text) = take_line(&mut line) {
                if tx.send(Ok(Inbound::Line(text))).await.is_err() {
                    return;
                }
            }
            if prompt && tx.send(Ok(Inbound::Prompt)).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_lines_and_prompt() {
        let (client, mut adapter) = duplex(256);
        let mut link = TransportLink::attach(client);

        adapter.write_all(b"SEARCHING...\r41 0C 1A F8\r\r>").await.unwrap();

        assert_eq!(link.read_line(WAIT).await.unwrap(), Inbound::Line("SEARCHING...".into()));
        assert_eq!(link.read_line(WAIT).await.unwrap(), Inbound::Line("41 0C 1A F8".into()));
        assert_eq!(link.read_line(WAIT).await.unwrap(), Inbound::Prompt);
    }

    #[tokio::test]
    async fn test_prompt_flushes_pending_line() {
        let (client, mut adapter) = duplex(256);
        let mut link = TransportLink::attach(client);

        adapter.write_all(b"OK>").await.unwrap();
        assert_eq!(link.read_line(WAIT).await.unwrap(), Inbound::Line("OK".into()));
        assert_eq!(link.read_line(WAIT).await.unwrap(), Inbound::Prompt);
    }

    #[tokio::test]
    async fn test_write_appends_carriage_return() {
        let (client, mut adapter) = duplex(256);
        let mut link = TransportLink::attach(client);

        link.write_line("ATZ").await.unwrap();
        let mut buf = [0u8; 4];
        adapter.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ATZ\r");
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, _adapter) = duplex(256);
        let mut link = TransportLink::attach(client);

        let err = link.read_line(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_eof_closes_link() {
        let (client, adapter) = duplex(256);
        let mut link = TransportLink::attach(client);
        drop(adapter);

        assert!(matches!(link.read_line(WAIT).await, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_abort_unblocks_reader() {
        let (client, _adapter) = duplex(256);
        let mut link = TransportLink::attach(client);
        link.abort_handle().abort();

        assert!(matches!(link.read_line(WAIT).await, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_drain_until_prompt() {
        let (client, mut adapter) = duplex(256);
        let mut link = TransportLink::attach(client);

        adapter.write_all(b"41 00 BE 3F A8 13\r\r>41 0D 28\r").await.unwrap();
        assert_eq!(link.drain(WAIT).await.unwrap(), 1);
        assert_eq!(link.read_line(WAIT).await.unwrap(), Inbound::Line("41 0D 28".into()));
    }

    #[tokio::test]
    async fn test_traffic_mirrored() {
        let (client, mut adapter) = duplex(256);
        let log = Arc::new(DiagnosticLog::new(16));
        let mut link = TransportLink::attach(client);
        link.set_log_sink(Some(log.clone()));

        link.write_line("010D").await.unwrap();
        adapter.write_all(b"41 0D 28\r>").await.unwrap();
        link.read_line(WAIT).await.unwrap();

        assert_eq!(log.lines(), vec![">> 010D", "<< 41 0D 28"]);
    }

    #[test]
    fn test_target_select() {
        assert_eq!(
            Target::select("192.168.0.10", 35000, false, 38400),
            Target::Tcp { host: "192.168.0.10".into(), port: 35000 }
        );
        let bt = Target::select("/dev/rfcomm0", 0, true, 38400);
        assert_eq!(bt.to_string(), "bluetooth:/dev/rfcomm0@38400");
    }
}
