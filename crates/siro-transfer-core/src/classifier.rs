// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Croc output classification
//
// Maps one line of croc console output to the signals it carries.
// Pure: no I/O and no state, so it can be called from any thread.
// The pattern table below targets the English output of croc 9.x/10.x;
// if croc changes its wording, this is the only place to update.

use crate::types::TransferDirection;
use regex::Regex;
use std::sync::LazyLock;

/// Marker croc prints in front of a generated code phrase
const CODE_MARKER: &str = "Code is:";
/// Environment hint croc prints for Unix receivers
const SECRET_HINT: &str = "CROC_SECRET=";

const ESTABLISHED_PHRASES: &[&str] = &["Connection established", "Exchanged"];
const SIZE_UNITS: &[&str] = &["KB", "MB", "GB", "B)"];
const CONNECTING_KEYWORDS: &[&str] = &["connection", "joined", "requesting"];
const SEND_COMPLETION: &[&str] = &["File sent", "Sent"];
const RECEIVE_COMPLETION: &[&str] = &["Received", "saved"];
const ERROR_MARKER: &str = "Error:";

/// `50.0% 2.00 MB/s`
static PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.\d+)%\s+(\d+\.\d+\s+\w+/s)").expect("valid progress pattern")
});

/// Any percentage, integer or decimal
static LOOSE_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid percent pattern"));

/// A speed token anywhere on the line, e.g. `(1.2/2.5 MB, 2.0 MB/s)`
static SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?\s*\w+/s)").expect("valid speed pattern"));

/// `Receiving 'x.pdf' (2.5 MB)`
static RECEIVING_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Receiving (.+) \(").expect("valid file name pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Connecting,
    Established,
}

/// A signal carried by one line of croc output
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// Send side: croc generated (or echoed) the code phrase
    CodeIssued { code: String },
    ConnectionPhase { kind: ConnectionKind },
    /// Receive side: croc asks for manual confirmation
    ReceivingPrompt { raw_text: String },
    /// Receive side: name of the incoming file
    FileAnnounced { name: String },
    ProgressUpdate { percent: f64, speed: Option<String> },
    Completed,
    Failed { message: String },
    /// No known pattern matched; logged, never surfaced
    Unrecognized { raw_text: String },
}

/// Classify one raw output line.
///
/// A line can carry several signals (a progress bar that also says
/// "Received", an error that mentions a connection). They are returned in
/// the order they must be folded. Blank lines yield nothing; any other line
/// yields at least one event, `Unrecognized` when nothing matched.
pub fn classify(direction: TransferDirection, line: &str) -> Vec<SignalEvent> {
    let cleaned = strip_ansi(line);
    let text = cleaned.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let sending = direction == TransferDirection::Send;
    let mut events = Vec::new();

    if sending {
        if let Some(code) = extract_code(text) {
            events.push(SignalEvent::CodeIssued { code });
        }
    } else {
        if is_accept_prompt(text) {
            events.push(SignalEvent::ReceivingPrompt {
                raw_text: text.to_string(),
            });
        }
        // Ahead of the connection event so the Connected status names the file
        if let Some(name) = extract_file_name(text) {
            events.push(SignalEvent::FileAnnounced { name });
        }
    }

    if shows_established(text) {
        events.push(SignalEvent::ConnectionPhase {
            kind: ConnectionKind::Established,
        });
    }

    if !sending && shows_connecting(text) {
        events.push(SignalEvent::ConnectionPhase {
            kind: ConnectionKind::Connecting,
        });
    }

    if let Some((percent, speed)) = parse_progress(text) {
        events.push(SignalEvent::ProgressUpdate { percent, speed });
    }

    if is_completion(direction, text) {
        events.push(SignalEvent::Completed);
    }

    if is_failure(direction, text) {
        events.push(SignalEvent::Failed {
            message: text.to_string(),
        });
    }

    if events.is_empty() {
        events.push(SignalEvent::Unrecognized {
            raw_text: text.to_string(),
        });
    }

    events
}

fn extract_code(text: &str) -> Option<String> {
    if let Some((_, rest)) = text.split_once(CODE_MARKER) {
        let code = rest.trim();
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    // (For Linux/macOS) CROC_SECRET="1234-abc-def" croc
    let (_, rest) = text.split_once(SECRET_HINT)?;
    let code = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next()?,
        None => rest.split_whitespace().next()?,
    };
    (!code.is_empty()).then(|| code.to_string())
}

fn is_accept_prompt(text: &str) -> bool {
    text.to_lowercase().contains("accept") && text.contains('?')
}

fn extract_file_name(text: &str) -> Option<String> {
    let caps = RECEIVING_NAME.captures(text)?;
    let name = caps[1].trim().trim_matches(|c| c == '\'' || c == '"');
    (!name.is_empty()).then(|| name.to_string())
}

fn shows_established(text: &str) -> bool {
    let announces_payload = (text.contains("Sending") || text.contains("Receiving"))
        && SIZE_UNITS.iter().any(|unit| text.contains(unit));
    announces_payload || ESTABLISHED_PHRASES.iter().any(|p| text.contains(p))
}

fn shows_connecting(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONNECTING_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Strict `NN.N% N.NN UNIT/s` first, then any percentage with an optional
/// speed token found elsewhere on the line.
fn parse_progress(text: &str) -> Option<(f64, Option<String>)> {
    if let Some(caps) = PROGRESS.captures(text) {
        let percent = caps[1].parse::<f64>().ok()?;
        return Some((clamp_percent(percent), Some(caps[2].to_string())));
    }

    let caps = LOOSE_PERCENT.captures(text)?;
    let percent = caps[1].parse::<f64>().ok()?;
    let speed = SPEED.captures(text).map(|c| c[1].to_string());
    Some((clamp_percent(percent), speed))
}

fn clamp_percent(percent: f64) -> f64 {
    percent.clamp(0.0, 100.0)
}

fn is_completion(direction: TransferDirection, text: &str) -> bool {
    let keywords = match direction {
        TransferDirection::Send => SEND_COMPLETION,
        TransferDirection::Receive => RECEIVE_COMPLETION,
    };
    keywords.iter().any(|k| text.contains(k))
}

fn is_failure(direction: TransferDirection, text: &str) -> bool {
    if text.contains(ERROR_MARKER) {
        return true;
    }
    // Receive side also treats any "error" substring as fatal. Send does not.
    if direction == TransferDirection::Receive && text.to_lowercase().contains("error") {
        tracing::debug!("Loose error match on receive output: {}", text);
        return true;
    }
    false
}

/// Drop ANSI escape sequences and stray control characters
pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // CSI: skip up to the final letter; otherwise skip one char
            if chars.next() == Some('[') {
                for c2 in chars.by_ref() {
                    if c2.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else if !c.is_control() || c == '\t' {
            result.push(c);
        }
    }
    result
}
