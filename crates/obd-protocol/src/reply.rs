//! Adapter reply classification
//!
//! Turns the raw text lines an ELM327 prints for one request into response
//! messages (one per answering ECU), or the error the adapter reported.

use crate::error::DecodeError;
use crate::isotp::{is_frame_line, parse_hex_line, IsoTpAssembler};
use tracing::debug;

#[derive(Debug, PartialEq)]
enum Line<'a> {
    Noise,
    Failure(DecodeError),
    /// Byte count heading an ELM formatted multi-line message (`014`)
    MultiLineHeader(usize),
    /// Indexed continuation of a multi-line message (`0: 49 02 01 ...`)
    MultiLinePart(&'a str),
    /// Frame carrying a CAN id (`7E8 06 41 00 BE 3F A8 13`)
    Framed(&'a str),
    Data(&'a str),
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_hexdigit())
}

fn classify<'a>(line: &'a str, echo: &str) -> Line<'a> {
    let upper = line.to_ascii_uppercase();

    if upper.is_empty() || upper == "OK" || upper.starts_with("SEARCHING") {
        return Line::Noise;
    }
    if normalize(line) == echo {
        return Line::Noise;
    }
    if upper.starts_with("BUS INIT") && !upper.contains("ERROR") {
        return Line::Noise;
    }
    if upper == "NO DATA" {
        return Line::Failure(DecodeError::NoData);
    }
    if upper == "?" {
        return Line::Failure(DecodeError::UnknownCommand);
    }
    if upper.contains("ERROR")
        || upper.contains("UNABLE TO CONNECT")
        || upper.contains("STOPPED")
        || upper.contains("BUFFER FULL")
    {
        return Line::Failure(DecodeError::Adapter(line.to_string()));
    }

    if upper.len() == 3 && is_hex(&upper) {
        if let Ok(count) = usize::from_str_radix(&upper, 16) {
            return Line::MultiLineHeader(count);
        }
    }
    if let Some((index, rest)) = line.split_once(':') {
        if index.len() == 1 && is_hex(index) {
            return Line::MultiLinePart(rest);
        }
    }

    let first = line.split_whitespace().next().unwrap_or_default();
    if first.len() == 3 && is_hex(first) {
        return Line::Framed(line);
    }

    Line::Data(line)
}

/// Split the lines printed for `command` into response messages.
///
/// Echoed commands, `OK`, `SEARCHING...` and `BUS INIT` progress lines are
/// dropped. ELM formatted multi-line messages are joined and trimmed to
/// their byte count. Lines carrying a CAN id, and headerless lines that
/// open with an ISO-TP frame, are reassembled. Adapter error lines only surface when no message was decoded.
pub fn parse_reply<S: AsRef<str>>(lines: &[S], command: &str) -> Result<Vec<Vec<u8>>, DecodeError> {
    let echo = normalize(command);
    let mut messages: Vec<Vec<u8>> = Vec::new();
    let mut failure: Option<DecodeError> = None;
    let mut multi_line: Option<(usize, Vec<u8>)> = None;
    let mut assembler = IsoTpAssembler::new();

    let finish = |multi_line: &mut Option<(usize, Vec<u8>)>, messages: &mut Vec<Vec<u8>>| {
        if let Some((count, mut bytes)) = multi_line.take() {
            bytes.truncate(count);
            if !bytes.is_empty() {
                messages.push(bytes);
            }
        }
    };

    for raw in lines {
        let line = raw.as_ref().trim();
        match classify(line, &echo) {
            Line::Noise => {}
            Line::Failure(err) => {
                debug!(line, "Adapter reported failure");
                failure.get_or_insert(err);
            }
            Line::MultiLineHeader(count) => {
                finish(&mut multi_line, &mut messages);
                multi_line = Some((count, Vec::with_capacity(count)));
            }
            Line::MultiLinePart(rest) => {
                let bytes = parse_hex_line(rest);
                match multi_line.as_mut() {
                    Some((_, buffer)) => buffer.extend(bytes),
                    None if !bytes.is_empty() => messages.push(bytes),
                    None => {}
                }
            }
            Line::Framed(frame) => {
                if let Some(result) = assembler.feed(frame) {
                    messages.push(result.payload);
                }
            }
            Line::Data(data) if is_frame_line(data, assembler.is_collecting()) => {
                if let Some(result) = assembler.feed(data) {
                    messages.push(result.payload);
                }
            }
            Line::Data(data) => {
                let bytes = parse_hex_line(data);
                if !bytes.is_empty() {
                    messages.push(bytes);
                }
            }
        }
    }
    finish(&mut multi_line, &mut messages);

    if messages.is_empty() {
        return Err(failure.unwrap_or(DecodeError::NoData));
    }
    Ok(messages)
}

/// Whether the lines printed for a Mode 04 request confirm the clear
/// (positive response `44` or a bare `OK`).
pub fn is_clear_confirmation<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|raw| {
        let line = raw.as_ref().trim();
        line.eq_ignore_ascii_case("OK")
            || line.split_whitespace().any(|token| token == "44")
            || normalize(line) == "44"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_reply() {
        let messages = parse_reply(&["41 0D 28"], "010D").unwrap();
        assert_eq!(messages, vec![vec![0x41, 0x0D, 0x28]]);
    }

    #[test]
    fn test_noise_and_echo_are_dropped() {
        let lines = ["010C", "SEARCHING...", "BUS INIT: ...OK", "41 0C 1A F8"];
        let messages = parse_reply(&lines, "010C").unwrap();
        assert_eq!(messages, vec![vec![0x41, 0x0C, 0x1A, 0xF8]]);
    }

    #[test]
    fn test_adapter_errors() {
        assert_eq!(parse_reply(&["NO DATA"], "0102"), Err(DecodeError::NoData));
        assert_eq!(parse_reply(&["?"], "01ZZ"), Err(DecodeError::UnknownCommand));
        assert!(matches!(
            parse_reply(&["SEARCHING...", "UNABLE TO CONNECT"], "0100"),
            Err(DecodeError::Adapter(_))
        ));
        assert!(matches!(parse_reply(&["CAN ERROR"], "0100"), Err(DecodeError::Adapter(_))));
        assert!(matches!(parse_reply(&["BUS INIT: ...ERROR"], "0100"), Err(DecodeError::Adapter(_))));
        assert_eq!(parse_reply::<&str>(&[], "0100"), Err(DecodeError::NoData));
    }

    #[test]
    fn test_data_wins_over_partial_failure() {
        let messages = parse_reply(&["41 0D 28", "NO DATA"], "010D").unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_elm_multi_line_format() {
        let lines = [
            "014",
            "0: 49 02 01 31 47 31",
            "1: 4A 43 35 34 34 34 52",
            "2: 37 32 35 32 33 36 37",
        ];
        let messages = parse_reply(&lines, "0902").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].len(), 0x14);
        assert_eq!(&messages[0][..3], &[0x49, 0x02, 0x01]);
        assert_eq!(messages[0].last(), Some(&0x37));
    }

    #[test]
    fn test_framed_lines_reassembled() {
        let lines = ["7E8 06 41 00 BE 3F A8 13", "7E9 06 41 00 98 18 80 10"];
        let messages = parse_reply(&lines, "0100").unwrap();
        assert_eq!(
            messages,
            vec![
                vec![0x41, 0x00, 0xBE, 0x3F, 0xA8, 0x13],
                vec![0x41, 0x00, 0x98, 0x18, 0x80, 0x10],
            ]
        );
    }

    #[test]
    fn test_headerless_frames_reassembled() {
        let lines = [
            "10 14 49 02 01 31 47 31",
            "21 4A 43 35 34 34 34 52",
            "22 37 32 35 32 33 36 37",
        ];
        let messages = parse_reply(&lines, "0902").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(String::from_utf8_lossy(&messages[0][3..]), "1G1JC5444R7252367");
    }

    #[test]
    fn test_byte_count_line_with_indexed_parts() {
        let lines = ["00A", "0: 43 04 01 71 03 00", "1: 04 20 C0 01 00 00 00"];
        let messages = parse_reply(&lines, "03").unwrap();
        assert_eq!(
            messages,
            vec![vec![0x43, 0x04, 0x01, 0x71, 0x03, 0x00, 0x04, 0x20, 0xC0, 0x01]]
        );
    }

    #[test]
    fn test_clear_confirmation() {
        assert!(is_clear_confirmation(&["44"]));
        assert!(is_clear_confirmation(&["7E8 01 44"]));
        assert!(is_clear_confirmation(&["OK"]));
        assert!(!is_clear_confirmation(&["NO DATA"]));
        assert!(!is_clear_confirmation(&["7F 04 22"]));
        assert!(!is_clear_confirmation::<&str>(&[]));
    }
}
