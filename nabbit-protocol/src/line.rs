//! Line framing
//!
//! Lines end with `\n` (clients send `\r\n`). Empty lines are ignored. A
//! line that is not valid UTF-8 or not valid JSON is reported as such and
//! the connection continues with the next line.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Longest accepted line, terminator included
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Errors decoding one line
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("Line exceeds {MAX_LINE_LEN} bytes")]
    TooLong,
}

impl DecodeError {
    /// Error class reported to the client
    pub fn class(&self) -> &'static str {
        match self {
            DecodeError::Utf8(_) => "UnicodeDecodeError",
            DecodeError::Json(_) => "JSONDecodeError",
            DecodeError::TooLong => "MalformedPacket",
        }
    }
}

/// Splits a byte stream into lines
#[derive(Debug, Clone, Default)]
pub struct LineParser {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the parser state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Bytes buffered without a terminator yet
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append received bytes
    pub fn feed_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the next complete line, terminator stripped
    ///
    /// Returns `None` when more bytes are needed. An over-long line is
    /// reported once as [`DecodeError::TooLong`] and skipped up to its
    /// terminator.
    pub fn next_line(&mut self) -> Option<Result<Vec<u8>, DecodeError>> {
        loop {
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if line.len() > MAX_LINE_LEN {
                        return Some(Err(DecodeError::TooLong));
                    }
                    return Some(Ok(line));
                }
                None => {
                    if self.buffer.len() > MAX_LINE_LEN && !self.discarding {
                        self.buffer.clear();
                        self.discarding = true;
                        return Some(Err(DecodeError::TooLong));
                    }
                    if self.discarding {
                        self.buffer.clear();
                    }
                    return None;
                }
            }
        }
    }
}

/// Decode one line
///
/// Returns `Ok(None)` for blank lines.
pub fn decode_line(line: &[u8]) -> Result<Option<Value>, DecodeError> {
    let text = std::str::from_utf8(line)?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(text)?))
}

/// Encode a message as one `\r\n`-terminated line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push_str("\r\n");
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_split_lines() {
        let mut parser = LineParser::new();
        parser.feed_bytes(b"{\"type\":\"gestalt\"}\r\n{\"type\":");
        assert_eq!(parser.next_line().unwrap().unwrap(), b"{\"type\":\"gestalt\"}");
        assert!(parser.next_line().is_none());
        parser.feed_bytes(b"\"sleep\"}\n");
        assert_eq!(parser.next_line().unwrap().unwrap(), b"{\"type\":\"sleep\"}");
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_too_long_line_skipped() {
        let mut parser = LineParser::new();
        parser.feed_bytes(&vec![b'a'; MAX_LINE_LEN + 1]);
        assert!(matches!(parser.next_line(), Some(Err(DecodeError::TooLong))));
        parser.feed_bytes(b"aaaa\r\n{}\r\n");
        assert_eq!(parser.next_line().unwrap().unwrap(), b"{}");
    }

    #[test]
    fn test_decode_blank() {
        assert!(decode_line(b"").unwrap().is_none());
        assert!(decode_line(b"  ").unwrap().is_none());
    }

    #[test]
    fn test_decode_errors_have_classes() {
        let err = decode_line(b"{\"type\":\xff}").unwrap_err();
        assert_eq!(err.class(), "UnicodeDecodeError");
        let err = decode_line(b"{\"type\":").unwrap_err();
        assert_eq!(err.class(), "JSONDecodeError");
    }

    #[test]
    fn test_encode_line() {
        let line = encode_line(&json!({"type": "state", "state": "idle"})).unwrap();
        assert!(line.ends_with("\r\n"));
        assert_eq!(decode_line(line.as_bytes()).unwrap(), Some(json!({"type": "state", "state": "idle"})));
    }

    proptest! {
        #[test]
        fn test_chunking_does_not_change_lines(
            lines in proptest::collection::vec("[a-z{}:\" ]{0,40}", 1..8),
            cut in 1usize..16,
        ) {
            let stream: Vec<u8> = lines
                .iter()
                .flat_map(|l| format!("{}\r\n", l).into_bytes())
                .collect();
            let mut parser = LineParser::new();
            let mut seen = Vec::new();
            for chunk in stream.chunks(cut) {
                parser.feed_bytes(chunk);
                while let Some(line) = parser.next_line() {
                    seen.push(String::from_utf8(line.unwrap()).unwrap());
                }
            }
            prop_assert_eq!(seen, lines);
            prop_assert_eq!(parser.pending(), 0);
        }
    }
}
