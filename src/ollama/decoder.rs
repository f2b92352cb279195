//! Newline-delimited JSON decoder for streaming generate responses.
//!
//! The server writes one JSON object per line:
//!
//! ```text
//! {"response":"Once","done":false}
//! {"response":" upon","done":false}
//! {"response":"","done":true}
//! ```
//!
//! Reads from the transport do not respect line boundaries, so bytes are
//! buffered until a full line is available. A line that fails to parse is
//! skipped. Once a `done: true` line is seen every later byte is ignored.
//! An `{"error":...}` line ends the stream and is reported through
//! [`StreamDecoder::take_error`].
//!
//! # Examples
//!
//! ```
//! use quill::ollama::decoder::StreamDecoder;
//!
//! let mut decoder = StreamDecoder::new();
//! assert!(decoder.push(br#"{"resp"#).is_empty());
//! let chunks = decoder.push(b"onse\":\"hi\"}\n");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "hi");
//! ```

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AssistError;

/// One ordered text delta from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    /// Generated text fragment; empty only on a bare terminal chunk.
    pub text: String,
    /// Whether this chunk ends the stream.
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }

    pub fn terminal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: true,
        }
    }
}

/// Wire shape of one stream line. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    /// Set when the server fails after the stream has started.
    #[serde(default)]
    error: Option<String>,
}

/// Longest line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Incremental line decoder.
///
/// Feed transport reads via [`StreamDecoder::push`] and call
/// [`StreamDecoder::finish`] when the connection closes. Each byte is
/// scanned for a newline once, so a long line split over many reads costs
/// time linear in its length. A line that outgrows the limit is dropped
/// and counted as skipped.
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    /// Offset in `buffer` already known to hold no newline.
    scan_from: usize,
    /// Dropping the rest of an oversized line.
    discarding: bool,
    max_line_bytes: usize,
    done: bool,
    skipped: usize,
    error: Option<String>,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            scan_from: 0,
            discarding: false,
            max_line_bytes: MAX_LINE_BYTES,
            done: false,
            skipped: 0,
            error: None,
        }
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the pending line limit.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Whether a terminal or error line has been decoded.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of lines skipped because they failed to decode or were too long.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    /// Take the message of an `error` line reported mid-stream.
    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    /// Push one transport read and return the chunks it completed, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        if self.done {
            return chunks;
        }
        self.buffer.extend_from_slice(bytes);

        let mut consumed = 0;
        let mut scan = self.scan_from;
        while let Some(pos) = self.buffer[scan..].iter().position(|&b| b == b'\n') {
            let line_end = scan + pos;
            if self.discarding {
                self.discarding = false;
            } else {
                let line = self.buffer[consumed..line_end].to_vec();
                if let Some(chunk) = self.decode_line(&line) {
                    chunks.push(chunk);
                }
            }
            consumed = line_end + 1;
            scan = consumed;
            if self.done {
                self.buffer.clear();
                self.scan_from = 0;
                return chunks;
            }
        }
        self.buffer.drain(..consumed);

        if self.discarding {
            self.buffer.clear();
        } else if self.buffer.len() > self.max_line_bytes {
            self.skipped += 1;
            debug!(
                pending = self.buffer.len(),
                limit = self.max_line_bytes,
                "dropping oversized stream line"
            );
            self.buffer.clear();
            self.discarding = true;
        }
        self.scan_from = self.buffer.len();
        chunks
    }

    /// Decode whatever remains after the transport closed.
    ///
    /// The remainder is a complete line at this point, since no more bytes
    /// can arrive.
    pub fn finish(&mut self) -> Option<StreamChunk> {
        self.scan_from = 0;
        if self.done || self.discarding || self.buffer.is_empty() {
            self.buffer.clear();
            self.discarding = false;
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamChunk> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match parse_line(raw) {
            Ok(line) => {
                if let Some(error) = line.error {
                    warn!(error = %error, "server reported an error mid-stream");
                    self.done = true;
                    self.error = Some(error);
                    return None;
                }
                if line.done {
                    self.done = true;
                    return Some(StreamChunk::terminal(line.response));
                }
                (!line.response.is_empty()).then(|| StreamChunk::delta(line.response))
            }
            Err(e) => {
                self.skipped += 1;
                debug!(error = %e, "skipping undecodable stream line");
                None
            }
        }
    }
}

fn parse_line(raw: &[u8]) -> Result<GenerateLine, AssistError> {
    serde_json::from_slice(raw).map_err(|e| AssistError::LineDecodeSkip(e.to_string()))
}

/// Wire shape of an error response body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Message carried by a non-success response.
///
/// Uses the `error` field of a JSON body, falling back to the raw body.
pub fn decode_error_body(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[StreamChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn split_line_yields_one_chunk() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(br#"{"resp"#).is_empty());
        let chunks = decoder.push(b"onse\":\"hi\"}\n");
        assert_eq!(chunks, vec![StreamChunk::delta("hi")]);
    }

    #[test]
    fn multiple_lines_in_one_read_keep_order() {
        let mut decoder = StreamDecoder::new();
        let chunks = decoder.push(
            b"{\"response\":\"a\",\"done\":false}\n{\"response\":\"b\",\"done\":false}\n{\"response\":\"c\"",
        );
        assert_eq!(texts(&chunks), ["a", "b"]);
        let chunks = decoder.push(b",\"done\":false}\n");
        assert_eq!(texts(&chunks), ["c"]);
    }

    #[test]
    fn done_line_terminates_and_ignores_trailing_bytes() {
        let mut decoder = StreamDecoder::new();
        let chunks = decoder.push(
            b"{\"response\":\"end\",\"done\":true}\n{\"response\":\"late\",\"done\":false}\n",
        );
        assert_eq!(chunks, vec![StreamChunk::terminal("end")]);
        assert!(decoder.is_done());
        assert!(decoder.push(b"{\"response\":\"later\"}\n").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn done_line_with_empty_response_is_bare_terminal() {
        let mut decoder = StreamDecoder::new();
        let chunks = decoder.push(b"{\"response\":\"\",\"done\":true}\n");
        assert_eq!(chunks, vec![StreamChunk::terminal("")]);
    }

    #[test]
    fn invalid_line_is_skipped() {
        let mut decoder = StreamDecoder::new();
        let chunks = decoder.push(b"not json\n{\"response\":\"ok\"}\n");
        assert_eq!(texts(&chunks), ["ok"]);
        assert_eq!(decoder.skipped_lines(), 1);
    }

    #[test]
    fn empty_response_without_done_yields_nothing() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"{\"response\":\"\",\"done\":false}\n").is_empty());
        assert_eq!(decoder.skipped_lines(), 0);
    }

    #[test]
    fn blank_and_crlf_lines() {
        let mut decoder = StreamDecoder::new();
        let chunks = decoder.push(b"\r\n\n{\"response\":\"x\"}\r\n");
        assert_eq!(texts(&chunks), ["x"]);
        assert_eq!(decoder.skipped_lines(), 0);
    }

    #[test]
    fn multibyte_char_split_across_reads() {
        let line = "{\"response\":\"montaña\"}\n".as_bytes();
        let split = line
            .iter()
            .position(|&b| b == 0xC3)
            .unwrap_or_else(|| panic!("no multibyte lead"))
            + 1;
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let chunks = decoder.push(&line[split..]);
        assert_eq!(texts(&chunks), ["montaña"]);
    }

    #[test]
    fn finish_decodes_unterminated_last_line() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"{\"response\":\"tail\"}").is_empty());
        assert_eq!(decoder.finish(), Some(StreamChunk::delta("tail")));
    }

    #[test]
    fn finish_drops_partial_garbage() {
        let mut decoder = StreamDecoder::new();
        decoder.push(b"{\"resp");
        assert!(decoder.finish().is_none());
        assert_eq!(decoder.skipped_lines(), 1);
    }

    #[test]
    fn long_line_over_many_small_reads_is_one_chunk() {
        let text = "x".repeat(4 * 1024 * 1024 - 64);
        let line = format!("{{\"response\":\"{text}\"}}\n");
        let mut decoder = StreamDecoder::new().with_max_line_bytes(8 * 1024 * 1024);
        let mut chunks = Vec::new();
        for read in line.as_bytes().chunks(4096) {
            chunks.extend(decoder.push(read));
        }
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.len(), text.len());
        assert_eq!(decoder.skipped_lines(), 0);
    }

    #[test]
    fn oversized_line_is_dropped_and_next_line_decodes() {
        let mut decoder = StreamDecoder::new().with_max_line_bytes(32);
        assert!(decoder.push(b"{\"response\":\"").is_empty());
        assert!(decoder.push(&[b'a'; 40]).is_empty());
        assert!(decoder.push(&[b'a'; 40]).is_empty());
        assert_eq!(decoder.skipped_lines(), 1);
        let chunks = decoder.push(b"\"}\n{\"response\":\"ok\"}\n");
        assert_eq!(texts(&chunks), ["ok"]);
        assert_eq!(decoder.skipped_lines(), 1);
    }

    #[test]
    fn oversized_tail_is_not_decoded_on_finish() {
        let mut decoder = StreamDecoder::new().with_max_line_bytes(8);
        decoder.push(b"{\"response\":\"too long\"}");
        assert!(decoder.finish().is_none());
        assert_eq!(decoder.skipped_lines(), 1);
    }

    #[test]
    fn error_line_ends_stream_after_earlier_chunks() {
        let mut decoder = StreamDecoder::new();
        let chunks = decoder.push(
            b"{\"response\":\"Once\"}\n{\"error\":\"out of memory\"}\n{\"response\":\"late\"}\n",
        );
        assert_eq!(texts(&chunks), ["Once"]);
        assert!(decoder.is_done());
        assert_eq!(decoder.take_error().as_deref(), Some("out of memory"));
        assert!(decoder.take_error().is_none());
        assert!(decoder.push(b"{\"response\":\"later\"}\n").is_empty());
    }

    #[test]
    fn error_line_without_newline_is_reported_on_finish() {
        let mut decoder = StreamDecoder::new();
        decoder.push(br#"{"error":"model crashed"}"#);
        assert!(decoder.finish().is_none());
        assert_eq!(decoder.take_error().as_deref(), Some("model crashed"));
    }

    #[test]
    fn error_body_json() {
        assert_eq!(
            decode_error_body(r#"{"error":"model not found: foo"}"#),
            "model not found: foo"
        );
    }

    #[test]
    fn error_body_falls_back_to_raw() {
        assert_eq!(decode_error_body("Bad Gateway"), "Bad Gateway");
        assert_eq!(decode_error_body(r#"{"message":"x"}"#), r#"{"message":"x"}"#);
    }
}
