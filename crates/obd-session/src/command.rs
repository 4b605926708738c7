//! Command and response values

use std::time::Duration;

/// How the end of a response is recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminator {
    /// The adapter's `>` prompt
    #[default]
    Prompt,
    /// A fixed number of lines; the trailing prompt is flushed before the
    /// next command
    LineCount(usize),
}

/// One command to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterCommand {
    text: String,
    terminator: Terminator,
    timeout: Option<Duration>,
}

impl AdapterCommand {
    /// Prompt-terminated command using the session's default timeout
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            terminator: Terminator::Prompt,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Explicit deadline, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl From<&str> for AdapterCommand {
    fn from(text: &str) -> Self {
        AdapterCommand::new(text)
    }
}

/// Lines collected for one command, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterResponse {
    command: String,
    lines: Vec<String>,
    payloads: Vec<Vec<u8>>,
    complete: bool,
    elapsed: Duration,
}

impl AdapterResponse {
    pub(crate) fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            lines: Vec::new(),
            payloads: Vec::new(),
            complete: false,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn push_line(&mut self, line: String) {
        self.lines.push(line);
    }

    pub(crate) fn push_payload(&mut self, payload: Vec<u8>) {
        self.payloads.push(payload);
    }

    pub(crate) fn finish(&mut self, prompt_seen: bool, elapsed: Duration) {
        self.complete = prompt_seen;
        self.elapsed = elapsed;
    }

    /// Command that produced this response
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Raw lines, prompt excluded
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// ISO-TP payloads reassembled from framed lines
    pub fn payloads(&self) -> &[Vec<u8>] {
        &self.payloads
    }

    /// Whether the adapter prompt ended the response
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}
