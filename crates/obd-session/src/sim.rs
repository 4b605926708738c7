//! Simulated ELM327 adapter
//!
//! Scripted adapter running in-process over `tokio::io::duplex`. Commands
//! without a script entry get ELM-like defaults: `OK` for AT commands,
//! `NO DATA` for OBD requests and `?` for anything else.

use crate::link::TransportLink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

const DUPLEX_CAPACITY: usize = 4096;

/// What the simulated adapter does with one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Lines followed by the prompt
    Lines(Vec<String>),
    /// Lines without a prompt
    Partial(Vec<String>),
    /// Exact bytes, nothing appended
    Raw(String),
    /// Never answer
    Silent,
    /// Wait, then reply
    Delayed(Duration, Box<Reply>),
    /// Drop the connection
    Close,
}

impl Reply {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Reply::Lines(lines.into_iter().map(Into::into).collect())
    }

    pub fn ok() -> Self {
        Reply::lines(["OK"])
    }

    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

/// Observable activity of the simulated adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A complete command line was read
    Received(String),
    /// The reply to a command is being written
    Answered(String),
}

fn normalize(command: &str) -> String {
    command
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn default_reply(command: &str) -> Reply {
    if command.starts_with("AT") {
        Reply::ok()
    } else if !command.is_empty() && command.chars().all(|c| c.is_ascii_hexdigit()) {
        Reply::lines(["NO DATA"])
    } else {
        Reply::lines(["?"])
    }
}

/// In-process adapter; clones share the same script and transcript
#[derive(Debug, Clone, Default)]
pub struct SimulatedAdapter {
    /// Replies per command; the last one repeats once the rest are used
    script: HashMap<String, Vec<Reply>>,
    echo: bool,
    transcript: Arc<Mutex<Vec<SimEvent>>>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A healthy CAN vehicle with two stored codes, one pending code, a VIN
    /// and a handful of live PIDs, answering with headers on
    pub fn vehicle() -> Self {
        Self::new()
            .on("ATZ", Reply::lines(["ELM327 v1.5"]))
            .on("ATI", Reply::lines(["ELM327 v1.5"]))
            .on("AT@1", Reply::lines(["OBDII to RS232 Interpreter"]))
            .on("ATRV", Reply::lines(["12.6V"]))
            .on("ATDP", Reply::lines(["AUTO, ISO 15765-4 (CAN 11/500)"]))
            .on("0100", Reply::lines(["7E8 06 41 00 BE 3F B8 13"]))
            .on("0120", Reply::lines(["7E8 06 41 20 80 01 A0 01"]))
            .on("0140", Reply::lines(["7E8 06 41 40 44 CC 00 00"]))
            .on("0104", Reply::lines(["7E8 03 41 04 56"]))
            .on("0105", Reply::lines(["7E8 03 41 05 73"]))
            .on("010C", Reply::lines(["7E8 04 41 0C 1A F8"]))
            .on("010D", Reply::lines(["7E8 03 41 0D 28"]))
            .on("0111", Reply::lines(["7E8 03 41 11 33"]))
            .on("0142", Reply::lines(["7E8 04 41 42 31 2E"]))
            .on("03", Reply::lines(["7E8 06 43 02 03 00 01 71"]))
            .on("07", Reply::lines(["7E8 04 47 01 04 20"]))
            .on("04", Reply::lines(["7E8 01 44"]))
            .on(
                "0902",
                Reply::lines([
                    "7E8 10 14 49 02 01 31 47 31",
                    "7E8 21 4A 43 35 34 34 34 52",
                    "7E8 22 37 32 35 32 33 36 37",
                ]),
            )
            .on(
                "0904",
                Reply::lines([
                    "7E8 10 13 49 04 01 31 32 36",
                    "7E8 21 33 39 35 34 30 00 00",
                    "7E8 22 00 00 00 00 00 00 00",
                ]),
            )
            .on("0906", Reply::lines(["7E8 07 49 06 01 17 91 BC 82"]))
            .on(
                "090A",
                Reply::lines([
                    "7E8 10 17 49 0A 01 45 43 4D",
                    "7E8 21 00 2D 45 6E 67 69 6E",
                    "7E8 22 65 43 6F 6E 74 72 6F",
                    "7E8 23 6C 00 00 00 00 00 00",
                ]),
            )
    }

    /// Append a reply for `command`
    pub fn on(mut self, command: &str, reply: Reply) -> Self {
        self.script.entry(normalize(command)).or_default().push(reply);
        self
    }

    /// Drop any scripted replies for `command` and answer with `reply`
    pub fn replace(mut self, command: &str, reply: Reply) -> Self {
        self.script.insert(normalize(command), vec![reply]);
        self
    }

    /// Echo commands back, as an adapter does before `ATE0`
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Start a connection to this adapter
    pub fn start(&self) -> TransportLink {
        let (client, adapter) = tokio::io::duplex(DUPLEX_CAPACITY);
        tokio::spawn(run(adapter, self.script.clone(), self.echo, self.transcript.clone()));
        TransportLink::attach(client)
    }

    /// Everything the adapter saw and answered, in order
    pub fn transcript(&self) -> Vec<SimEvent> {
        self.transcript.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Commands received, in order
    pub fn commands(&self) -> Vec<String> {
        self.transcript()
            .into_iter()
            .filter_map(|event| match event {
                SimEvent::Received(command) => Some(command),
                SimEvent::Answered(_) => None,
            })
            .collect()
    }
}

fn record(transcript: &Mutex<Vec<SimEvent>>, event: SimEvent) {
    transcript.lock().unwrap_or_else(|p| p.into_inner()).push(event);
}

/// Write the reply; `false` when the connection should be dropped. The
/// answer is recorded before its bytes reach the client.
async fn answer(
    stream: &mut DuplexStream,
    reply: &Reply,
    command: String,
    transcript: &Mutex<Vec<SimEvent>>,
) -> std::io::Result<bool> {
    let mut reply = reply;
    let out = loop {
        match reply {
            Reply::Delayed(delay, inner) => {
                tokio::time::sleep(*delay).await;
                reply = &**inner;
            }
            Reply::Lines(lines) => {
                let mut out: String = lines.iter().map(|line| format!("{}\r", line)).collect();
                out.push_str("\r>");
                break out;
            }
            Reply::Partial(lines) => break lines.iter().map(|line| format!("{}\r", line)).collect(),
            Reply::Raw(raw) => break raw.clone(),
            Reply::Silent => {
                record(transcript, SimEvent::Answered(command));
                return Ok(true);
            }
            Reply::Close => return Ok(false),
        }
    };
    record(transcript, SimEvent::Answered(command));
    stream.write_all(out.as_bytes()).await?;
    stream.flush().await?;
    Ok(true)
}

async fn run(
    mut stream: DuplexStream,
    script: HashMap<String, Vec<Reply>>,
    mut echo: bool,
    transcript: Arc<Mutex<Vec<SimEvent>>>,
) {
    let mut calls: HashMap<String, usize> = HashMap::new();
    let mut pending = String::new();
    let mut buf = [0u8; 256];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.push_str(&String::from_utf8_lossy(&buf[..n]));

        while let Some(end) = pending.find('\r') {
            let raw: String = pending.drain(..=end).collect();
            let command = normalize(&raw);
            if command.is_empty() {
                continue;
            }
            debug!("Simulated adapter received {}", command);
            record(&transcript, SimEvent::Received(command.clone()));

            if echo && stream.write_all(format!("{}\r", command).as_bytes()).await.is_err() {
                return;
            }

            let reply = match script.get(&command) {
                Some(replies) if !replies.is_empty() => {
                    let call = calls.entry(command.clone()).or_insert(0);
                    let reply = replies[(*call).min(replies.len() - 1)].clone();
                    *call += 1;
                    reply
                }
                _ => default_reply(&command),
            };

            match command.as_str() {
                "ATE0" => echo = false,
                "ATE1" => echo = true,
                _ => {}
            }

            match answer(&mut stream, &reply, command, &transcript).await {
                Ok(true) => {}
                Ok(false) | Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Inbound;

    const WAIT: Duration = Duration::from_millis(500);

    async fn collect(link: &mut TransportLink) -> Vec<String> {
        let mut lines = Vec::new();
        while let Inbound::Line(line) = link.read_line(WAIT).await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_scripted_replies_repeat_last() {
        let adapter = SimulatedAdapter::new()
            .on("010D", Reply::lines(["41 0D 28"]))
            .on("010D", Reply::lines(["41 0D 29"]));
        let mut link = adapter.start();

        for expected in ["41 0D 28", "41 0D 29", "41 0D 29"] {
            link.write_line("01 0d").await.unwrap();
            assert_eq!(collect(&mut link).await, vec![expected]);
        }
        assert_eq!(adapter.commands(), vec!["010D", "010D", "010D"]);
    }

    #[tokio::test]
    async fn test_replace_overrides_earlier_replies() {
        let adapter = SimulatedAdapter::vehicle().replace("010D", Reply::lines(["41 0D 50"]));
        let mut link = adapter.start();

        link.write_line("010D").await.unwrap();
        assert_eq!(collect(&mut link).await, vec!["41 0D 50"]);
        link.write_line("010C").await.unwrap();
        assert_eq!(collect(&mut link).await, vec!["7E8 04 41 0C 1A F8"]);
    }

    #[tokio::test]
    async fn test_partial_reply_has_no_prompt() {
        let adapter = SimulatedAdapter::new().on("0105", Reply::Partial(vec!["41 05".into()]));
        let mut link = adapter.start();

        link.write_line("0105").await.unwrap();
        assert_eq!(link.read_line(WAIT).await.unwrap(), Inbound::Line("41 05".into()));
        assert!(link.read_line(Duration::from_millis(50)).await.is_err());
    }

    #[tokio::test]
    async fn test_defaults() {
        let mut link = SimulatedAdapter::new().start();

        link.write_line("ATE0").await.unwrap();
        assert_eq!(collect(&mut link).await, vec!["OK"]);
        link.write_line("0123").await.unwrap();
        assert_eq!(collect(&mut link).await, vec!["NO DATA"]);
        link.write_line("HELLO").await.unwrap();
        assert_eq!(collect(&mut link).await, vec!["?"]);
    }

    #[tokio::test]
    async fn test_echo_until_disabled() {
        let mut link = SimulatedAdapter::new().with_echo(true).start();

        link.write_line("ATE0").await.unwrap();
        assert_eq!(collect(&mut link).await, vec!["ATE0", "OK"]);
        link.write_line("ATL0").await.unwrap();
        assert_eq!(collect(&mut link).await, vec!["OK"]);
    }
}
