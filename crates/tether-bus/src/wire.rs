//! Newline-delimited envelope framing used by the `/stream` endpoint.
//!
//! Every event travels as one JSON object followed by `\n`:
//!
//! ```text
//! {"type":"project.CompleteEvent","event":{...}}
//! {"type":"deployer.DeployRequestedEvent","event":{}}
//! ```

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};

/// Content type of the event stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Wire pairing of a kind name and its raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: serde_json::Value,
}

impl Envelope {
    /// Encodes the envelope as one ndjson line, newline included.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self).map_err(BusError::Envelope)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parses one line (without its terminator).
    pub fn from_line(line: &[u8]) -> Result<Self> {
        serde_json::from_slice(line).map_err(BusError::Envelope)
    }
}

/// Incremental splitter turning arbitrary body chunks into complete lines.
///
/// Chunks from the network rarely align with line boundaries, so partial
/// lines are buffered until their `\n` arrives. Blank lines are dropped.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    /// Decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            self.pending.extend_from_slice(head);
            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line);
            }
            rest = &tail[1..];
        }

        self.pending.extend_from_slice(rest);
        lines
    }

    /// Returns the unterminated tail once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let tail = std::mem::take(&mut self.pending);
        (!tail.iter().all(u8::is_ascii_whitespace)).then_some(tail)
    }

    /// Bytes buffered while waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope {
            kind: "project.CompleteEvent".to_string(),
            event: serde_json::json!({ "finished": true }),
        };
        let line = envelope.to_line().unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["type"], "project.CompleteEvent");
        assert_eq!(value["event"]["finished"], true);
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(Envelope::from_line(b"{not json").is_err());
        assert!(Envelope::from_line(br#"{"event":{}}"#).is_err());
    }

    #[test]
    fn test_line_decoder_reassembles_split_chunks() {
        let mut decoder = LineDecoder::new();

        assert!(decoder.push(br#"{"type":"a","#).is_empty());
        let lines = decoder.push(b"\"event\":1}\n{\"type\":\"b\",\"event\":2}\n{\"ty");

        assert_eq!(lines.len(), 2);
        assert_eq!(Envelope::from_line(&lines[0]).unwrap().kind, "a");
        assert_eq!(Envelope::from_line(&lines[1]).unwrap().kind, "b");
        assert_eq!(decoder.pending_len(), 4);
    }

    #[test]
    fn test_line_decoder_skips_blank_lines_and_crlf() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"\n\r\nabc\r\n  \n");

        assert_eq!(lines, vec![b"abc".to_vec()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_line_decoder_finish_returns_tail() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"first\nsecond");

        assert_eq!(decoder.finish(), Some(b"second".to_vec()));
        assert_eq!(decoder.pending_len(), 0);
    }
}
