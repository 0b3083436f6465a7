//! Incremental newline-delimited JSON decoder.
//!
//! Bytes arrive in arbitrary chunks. Complete lines are decoded as soon as
//! their terminator is seen; the trailing partial line stays buffered until
//! the next chunk.

use crate::protocol::events::{EngineEvent, Interpreted, RawRecord};

/// Outcome of decoding one complete line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A record with a recognized type tag.
    Event(EngineEvent),
    /// Valid envelope with a tag this version does not know.
    Unrecognized { kind: String },
    /// The line could not be parsed; it is reported and skipped.
    Malformed { line: String, reason: String },
}

/// Stateful line decoder. Holds at most one pending partial line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes, in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut decoded = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let line = std::mem::take(&mut self.pending);
            if let Some(item) = decode_line(&String::from_utf8_lossy(&line)) {
                decoded.push(item);
            }
        }

        self.pending.extend_from_slice(rest);
        decoded
    }

    /// Number of buffered bytes belonging to an incomplete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop and return whatever partial line is buffered.
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

/// Decode a single line. Returns `None` for blank lines.
pub fn decode_line(line: &str) -> Option<Decoded> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parsed = serde_json::from_str::<RawRecord>(line).and_then(|raw| raw.interpret());
    Some(match parsed {
        Ok(Interpreted::Known(event)) => Decoded::Event(event),
        Ok(Interpreted::Unrecognized(kind)) => Decoded::Unrecognized { kind },
        Err(e) => Decoded::Malformed {
            line: line.to_string(),
            reason: e.to_string(),
        },
    })
}
