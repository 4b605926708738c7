//! ISO 15765-2 (ISO-TP) Reassembly
//!
//! Adapters running without CAN auto-formatting, and many clones, print
//! one CAN frame per line instead of a reassembled message. The assembler
//! consumes those lines one at a time and yields a payload once the
//! message is complete.
//!
//! | PCI nibble | Frame             |
//! |------------|-------------------|
//! | `0x0`      | Single Frame      |
//! | `0x1`      | First Frame       |
//! | `0x2`      | Consecutive Frame |
//! | `0x3`      | Flow Control      |

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default cap on an assembled payload
pub const DEFAULT_MAX_PAYLOAD: usize = 512;

/// Largest length a 12-bit First Frame length field can declare
pub const ISO_TP_MAX_LENGTH: usize = 4095;

/// Length of the CAN address header printed ahead of the PCI byte
const HEADER_LEN: usize = 3;

/// ISO-TP frame type, taken from the high nibble of the PCI byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Single,
    First,
    Consecutive,
    FlowControl,
}

impl FrameKind {
    fn from_pci(pci: u8) -> Option<Self> {
        match pci >> 4 {
            0x0 => Some(FrameKind::Single),
            0x1 => Some(FrameKind::First),
            0x2 => Some(FrameKind::Consecutive),
            0x3 => Some(FrameKind::FlowControl),
            _ => None,
        }
    }
}

/// Assembler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssemblyState {
    #[default]
    Idle,
    Collecting,
}

/// A completed ISO-TP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyResult {
    /// Reassembled payload, exactly `total_expected` bytes long
    pub payload: Vec<u8>,
    /// Length declared by the Single or First Frame (after clamping)
    pub total_expected: usize,
    /// Bytes actually returned
    pub received: usize,
}

/// Line-oriented ISO-TP reassembler
///
/// One instance belongs to one logical request stream. Call [`reset`]
/// before starting a new request so a half-finished message cannot leak
/// into the next one.
///
/// [`reset`]: IsoTpAssembler::reset
#[derive(Debug, Clone)]
pub struct IsoTpAssembler {
    max_payload: usize,
    state: AssemblyState,
    total_length: usize,
    expected_sequence: u8,
    buffer: Vec<u8>,
}

impl Default for IsoTpAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl IsoTpAssembler {
    /// Create an assembler with the default 512 byte payload cap
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create an assembler with a custom payload cap (at most 4095)
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(ISO_TP_MAX_LENGTH),
            state: AssemblyState::Idle,
            total_length: 0,
            expected_sequence: 0,
            buffer: Vec::new(),
        }
    }

    /// Feed one raw adapter line.
    ///
    /// Returns a result when a message completes and `None` when more
    /// frames are needed or the line was discarded.
    pub fn feed(&mut self, raw_line: &str) -> Option<AssemblyResult> {
        let bytes = parse_hex_line(raw_line);
        if bytes.is_empty() {
            return None;
        }

        let frame = &bytes[pci_offset(&bytes)..];
        let pci = frame[0];

        match FrameKind::from_pci(pci) {
            Some(FrameKind::Single) => self.single_frame(frame),
            Some(FrameKind::First) => self.first_frame(frame),
            Some(FrameKind::Consecutive) => self.consecutive_frame(frame),
            // Flow control travels towards the ECU, nothing to assemble
            Some(FrameKind::FlowControl) => None,
            None => {
                warn!("ISO-TP: unknown PCI nibble 0x{:X} in '{}'", pci >> 4, raw_line.trim());
                None
            }
        }
    }

    /// Drop any partial message and return to idle
    pub fn reset(&mut self) {
        self.state = AssemblyState::Idle;
        self.total_length = 0;
        self.expected_sequence = 0;
        self.buffer.clear();
    }

    /// Check if a multi-frame message is in progress
    pub fn is_collecting(&self) -> bool {
        self.state == AssemblyState::Collecting
    }

    /// Current state
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Payload cap in bytes
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn single_frame(&mut self, frame: &[u8]) -> Option<AssemblyResult> {
        let len = (frame[0] & 0x0F) as usize;
        let data = &frame[1..];
        if data.len() < len {
            warn!("ISO-TP: single frame declares {} bytes, only {} present", len, data.len());
            return None;
        }

        self.reset();
        Some(AssemblyResult {
            payload: data[..len].to_vec(),
            total_expected: len,
            received: len,
        })
    }

    fn first_frame(&mut self, frame: &[u8]) -> Option<AssemblyResult> {
        if frame.len() < 2 {
            warn!("ISO-TP: first frame without length byte");
            return None;
        }

        let mut total = (((frame[0] & 0x0F) as usize) << 8) | frame[1] as usize;
        if total > self.max_payload {
            warn!(
                "ISO-TP: first frame declares {} bytes, capping at {}",
                total, self.max_payload
            );
            total = self.max_payload;
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(&frame[2..]);
        self.total_length = total;
        self.expected_sequence = 1;
        self.state = AssemblyState::Collecting;

        debug!("ISO-TP: FF total={} collected={}", total, self.buffer.len());
        None
    }

    fn consecutive_frame(&mut self, frame: &[u8]) -> Option<AssemblyResult> {
        if self.state != AssemblyState::Collecting {
            warn!("ISO-TP: consecutive frame while idle, dropped");
            return None;
        }

        let sequence = frame[0] & 0x0F;
        if sequence != self.expected_sequence {
            warn!(
                "ISO-TP: sequence mismatch, expected {} got {}; message abandoned",
                self.expected_sequence, sequence
            );
            self.reset();
            return None;
        }

        self.buffer.extend_from_slice(&frame[1..]);
        self.expected_sequence = (self.expected_sequence + 1) & 0x0F;
        debug!(
            "ISO-TP: CF seq={} collected={}/{}",
            sequence,
            self.buffer.len(),
            self.total_length
        );

        if self.buffer.len() < self.total_length {
            return None;
        }

        let mut payload = std::mem::take(&mut self.buffer);
        payload.truncate(self.total_length);
        let total_expected = self.total_length;
        self.reset();

        Some(AssemblyResult {
            received: payload.len(),
            total_expected,
            payload,
        })
    }
}

fn is_hex_byte(token: &str) -> bool {
    (1..=2).contains(&token.len()) && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Decode a whitespace separated line of one or two digit hex tokens.
///
/// Other tokens (CAN ids such as `7E8`, frame indexes such as `0:`,
/// adapter text) are skipped.
pub fn parse_hex_line(raw_line: &str) -> Vec<u8> {
    raw_line
        .split_whitespace()
        .filter(|token| is_hex_byte(token))
        .filter_map(|token| u8::from_str_radix(token, 16).ok())
        .collect()
}

/// Whether a raw adapter line carries an ISO-TP frame.
///
/// A line led by a CAN id (`7E8 10 14 ...`) qualifies when bytes follow
/// the id. A headerless line qualifies when it opens with a complete
/// Single Frame or a First Frame, or with a Consecutive Frame while a
/// message is `collecting`. ELM byte counts (`00A`) and indexed multi-line
/// parts (`0: 43 04 ...`) never qualify.
pub fn is_frame_line(raw_line: &str, collecting: bool) -> bool {
    if raw_line.contains(':') {
        return false;
    }

    let mut tokens = raw_line.split_whitespace();
    let Some(first) = tokens.next() else {
        return false;
    };
    if first.len() == 3 && first.chars().all(|c| c.is_ascii_hexdigit()) {
        return tokens.next().is_some();
    }
    if !raw_line.split_whitespace().all(is_hex_byte) {
        return false;
    }

    let bytes = parse_hex_line(raw_line);
    let pci = bytes[0];
    match FrameKind::from_pci(pci) {
        Some(FrameKind::Single) => {
            let len = (pci & 0x0F) as usize;
            len > 0 && bytes.len() > len
        }
        Some(FrameKind::First) => {
            bytes.len() > 2 && ((((pci & 0x0F) as usize) << 8) | bytes[1] as usize) > 7
        }
        Some(FrameKind::Consecutive) => collecting,
        Some(FrameKind::FlowControl) | None => false,
    }
}

/// Offset of the PCI byte: a leading byte above `0x3F` cannot be a PCI, so
/// with enough bytes on the line it is taken as a 3-byte CAN header.
fn pci_offset(bytes: &[u8]) -> usize {
    if bytes[0] >> 4 > 3 && bytes.len() > HEADER_LEN {
        HEADER_LEN
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hex_line(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Split a payload into First + Consecutive frame lines (8 byte CAN frames)
    fn frame_lines(payload: &[u8], declared: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let head = payload.len().min(6);
        let mut first = vec![0x10 | ((declared >> 8) as u8 & 0x0F), declared as u8];
        first.extend_from_slice(&payload[..head]);
        lines.push(format!("7E8 {}", hex_line(&first)));

        for (i, chunk) in payload[head..].chunks(7).enumerate() {
            let mut frame = vec![0x20 | ((i + 1) as u8 & 0x0F)];
            frame.extend_from_slice(chunk);
            lines.push(format!("7E8 {}", hex_line(&frame)));
        }
        lines
    }

    #[test]
    fn test_single_frame() {
        let mut asm = IsoTpAssembler::new();
        let result = asm.feed("06 41 00 BE 3F A8 13").unwrap();
        assert_eq!(result.payload, vec![0x41, 0x00, 0xBE, 0x3F, 0xA8, 0x13]);
        assert_eq!(result.total_expected, 6);
        assert_eq!(result.received, 6);
        assert!(!asm.is_collecting());
    }

    #[test]
    fn test_single_frame_with_can_id_token() {
        let mut asm = IsoTpAssembler::new();
        let result = asm.feed("7E8 04 41 0C 1A F8 00 00 00").unwrap();
        assert_eq!(result.payload, vec![0x41, 0x0C, 0x1A, 0xF8]);
    }

    #[test]
    fn test_single_frame_behind_three_byte_header() {
        let mut asm = IsoTpAssembler::new();
        let result = asm.feed("f1 da 18 03 43 01 71").unwrap();
        assert_eq!(result.payload, vec![0x43, 0x01, 0x71]);
    }

    #[test]
    fn test_short_single_frame_rejected() {
        let mut asm = IsoTpAssembler::new();
        assert!(asm.feed("06 41 0C 1A").is_none());
        assert!(!asm.is_collecting());
    }

    #[test]
    fn test_unparseable_line_ignored() {
        let mut asm = IsoTpAssembler::new();
        assert!(asm.feed("NO DATA").is_none());
        assert!(asm.feed("   ").is_none());
        assert_eq!(asm.state(), AssemblyState::Idle);
    }

    #[test]
    fn test_vin_multi_frame() {
        let mut asm = IsoTpAssembler::new();
        assert!(asm.feed("7E8 10 14 49 02 01 31 47 31").is_none());
        assert!(asm.is_collecting());
        assert!(asm.feed("7E8 21 4A 43 35 34 34 34 52").is_none());
        let result = asm.feed("7E8 22 37 32 35 32 33 36 37").unwrap();

        assert_eq!(result.total_expected, 0x14);
        assert_eq!(result.payload.len(), 0x14);
        assert_eq!(&result.payload[..3], &[0x49, 0x02, 0x01]);
        assert_eq!(
            String::from_utf8_lossy(&result.payload[3..]),
            "1G1JC5444R7252367"
        );
        assert!(!asm.is_collecting());
    }

    #[test]
    fn test_flow_control_ignored() {
        let mut asm = IsoTpAssembler::new();
        asm.feed("10 0A 43 04 01 71 03 00");
        assert!(asm.feed("30 00 00").is_none());
        assert!(asm.is_collecting());
    }

    #[test]
    fn test_consecutive_frame_while_idle_dropped() {
        let mut asm = IsoTpAssembler::new();
        assert!(asm.feed("21 01 02 03 04 05 06 07").is_none());
        assert!(!asm.is_collecting());
    }

    #[test]
    fn test_sequence_mismatch_resets() {
        let mut asm = IsoTpAssembler::new();
        asm.feed("10 0A 43 04 01 71 03 00");
        assert!(asm.feed("22 01 71 00 00 00 00 00").is_none());
        assert!(!asm.is_collecting());

        // Nothing leaks into the next message
        asm.feed("10 08 43 03 01 71 03 00");
        let result = asm.feed("21 01 02 AA AA AA AA AA").unwrap();
        assert_eq!(result.payload, vec![0x43, 0x03, 0x01, 0x71, 0x03, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_oversized_first_frame_clamped() {
        let mut asm = IsoTpAssembler::new();
        // Declares 0xFFF bytes
        asm.feed("1F FF 00 01 02 03 04 05");
        let mut result = None;
        let mut seq = 1u8;
        while result.is_none() {
            let line = format!("{:02X} 11 22 33 44 55 66 77", 0x20 | seq);
            result = asm.feed(&line);
            seq = (seq + 1) & 0x0F;
        }
        let result = result.unwrap();
        assert_eq!(result.total_expected, 512);
        assert_eq!(result.payload.len(), 512);
    }

    #[test]
    fn test_custom_cap_limited_to_iso_tp_range() {
        assert_eq!(IsoTpAssembler::with_max_payload(10_000).max_payload(), 4095);
        assert_eq!(IsoTpAssembler::with_max_payload(64).max_payload(), 64);
    }

    #[test]
    fn test_hex_tokens() {
        assert_eq!(parse_hex_line("41 0D 28"), vec![0x41, 0x0D, 0x28]);
        assert_eq!(parse_hex_line("41 0D 7"), vec![0x41, 0x0D, 0x07]);
        assert_eq!(parse_hex_line("+F 41 -1 0D"), vec![0x41, 0x0D]);
        assert_eq!(parse_hex_line("7E8 0: 43"), vec![0x43]);
    }

    #[test]
    fn test_frame_lines_recognized() {
        assert!(is_frame_line("7E8 06 41 00 BE 3F A8 13", false));
        assert!(is_frame_line("7E8 21 4A 43 35 34 34 34 52", false));
        assert!(is_frame_line("10 14 49 02 01 31 47 31", false));
        assert!(is_frame_line("06 41 00 BE 3F A8 13", false));
        assert!(is_frame_line("21 4A 43 35 34 34 34 52", true));
    }

    #[test]
    fn test_non_frame_lines_rejected() {
        // ELM byte count and indexed parts
        assert!(!is_frame_line("00A", false));
        assert!(!is_frame_line("0: 43 04 01 71 03 00", false));
        assert!(!is_frame_line("1: 04 20 C0 01 00 00 00", true));
        // Plain replies start with a response mode byte
        assert!(!is_frame_line("41 0C 1A F8", false));
        assert!(!is_frame_line("43 01 71 03 00 00 00", false));
        assert!(!is_frame_line("7F 01 12", false));
        // Consecutive frame with nothing to continue
        assert!(!is_frame_line("21 4A 43 35 34 34 34 52", false));
        // First frame short enough to be a single frame
        assert!(!is_frame_line("10 05 41 00", false));
        assert!(!is_frame_line("06 41 0C", false));
        assert!(!is_frame_line("NO DATA", false));
        assert!(!is_frame_line("", false));
    }

    proptest! {
        #[test]
        fn prop_single_frame_completes(payload in proptest::collection::vec(any::<u8>(), 0..=7)) {
            let mut asm = IsoTpAssembler::new();
            let mut frame = vec![payload.len() as u8];
            frame.extend_from_slice(&payload);
            let result = asm.feed(&hex_line(&frame)).unwrap();
            prop_assert_eq!(result.received, payload.len());
            prop_assert_eq!(result.total_expected, payload.len());
            prop_assert_eq!(result.payload, payload);
            prop_assert!(!asm.is_collecting());
        }

        #[test]
        fn prop_multi_frame_round_trip(payload in proptest::collection::vec(any::<u8>(), 8..=512)) {
            let mut asm = IsoTpAssembler::new();
            let lines = frame_lines(&payload, payload.len());
            let last = lines.len() - 1;
            for (i, line) in lines.iter().enumerate() {
                let result = asm.feed(line);
                if i < last {
                    prop_assert!(result.is_none());
                } else {
                    let result = result.unwrap();
                    prop_assert_eq!(&result.payload, &payload);
                    prop_assert_eq!(result.total_expected, payload.len());
                }
            }
            prop_assert!(!asm.is_collecting());
        }

        #[test]
        fn prop_declared_length_never_exceeded(
            payload in proptest::collection::vec(any::<u8>(), 520..=700),
            declared in 513usize..=4095,
        ) {
            let mut asm = IsoTpAssembler::new();
            let mut completed = None;
            for line in frame_lines(&payload, declared) {
                if let Some(result) = asm.feed(&line) {
                    completed = Some(result);
                    break;
                }
            }
            let result = completed.unwrap();
            prop_assert_eq!(result.payload.len(), 512);
            prop_assert_eq!(&result.payload[..], &payload[..512]);
        }

        #[test]
        fn prop_wrong_sequence_abandons(
            payload in proptest::collection::vec(any::<u8>(), 20..=100),
            bad in 0u8..16,
        ) {
            prop_assume!(bad != 1);
            let mut asm = IsoTpAssembler::new();
            let lines = frame_lines(&payload, payload.len());
            asm.feed(&lines[0]);
            let corrupted = format!("7E8 {:02X} 00 00 00 00 00 00 00", 0x20 | bad);
            prop_assert!(asm.feed(&corrupted).is_none());
            prop_assert!(!asm.is_collecting());

            let mut result = None;
            for line in &lines {
                result = asm.feed(line);
            }
            prop_assert_eq!(result.unwrap().payload, payload);
        }
    }
}
