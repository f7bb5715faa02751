//! Incremental parsing of streamed chat-completion responses
//!
//! The server answers a streaming request with a body of newline-separated
//! frames, each either irrelevant or prefixed with `data: ` and carrying a
//! JSON delta payload, terminated by the `data: [DONE]` sentinel.

use serde::Deserialize;

/// End-of-stream sentinel payload
const DONE_SENTINEL: &str = "[DONE]";

/// Frame prefix marking data lines
const DATA_PREFIX: &str = "data:";

/// Cap on buffered bytes, to bound memory on malformed streams.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Buffers raw body bytes and yields complete lines.
///
/// Incomplete trailing lines are retained for the next `feed` call. The
/// buffer is truncated at a line boundary if a malformed stream never
/// produces a newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
    truncated: bool,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the complete lines they finish.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        if self.buffer.len() > MAX_BUFFER_SIZE {
            if !self.truncated {
                tracing::warn!(
                    "stream buffer exceeded {} bytes, truncating; the stream may be malformed",
                    MAX_BUFFER_SIZE
                );
                self.truncated = true;
            }
            // Round down to a char boundary so multi-byte content cannot
            // split mid-character.
            let mut target_start = self.buffer.len() - MAX_BUFFER_SIZE / 2;
            while !self.buffer.is_char_boundary(target_start) {
                target_start -= 1;
            }
            let start = self.buffer[target_start..]
                .find('\n')
                .map(|pos| target_start + pos + 1)
                .unwrap_or(target_start);
            self.buffer = self.buffer[start..].to_string();
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..pos + 1).collect();
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
            self.truncated = false;
        }
        lines
    }

    /// Whether an incomplete line is pending.
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// JSON payload of one streamed chunk
#[derive(Debug, Deserialize)]
pub struct ChunkPayload {
    /// Completion choices; absent or empty chunks carry no content
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// One choice within a streamed chunk
#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    /// Incremental delta for this choice
    #[serde(default)]
    pub delta: Option<Delta>,
}

/// Incremental message delta
#[derive(Debug, Deserialize)]
pub struct Delta {
    /// New role, present on the frame that opens a message
    #[serde(default)]
    pub role: Option<String>,
    /// Content fragment appended to the current message
    #[serde(default)]
    pub content: Option<String>,
}

impl Delta {
    /// Whether the delta carries neither a role nor content.
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.content.is_none()
    }
}

/// Outcome of parsing one body line
#[derive(Debug)]
pub enum Frame {
    /// A well-formed delta frame
    Delta(Delta),
    /// The end-of-stream sentinel
    Done,
    /// Anything else: non-data lines, malformed JSON, empty deltas
    Skip,
}

/// Parse one line of the response body into a frame.
///
/// Lines without the data prefix, with malformed JSON, or without a
/// choices/delta payload are skipped without failing the call.
pub fn parse_frame(line: &str) -> Frame {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }

    let chunk: ChunkPayload = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(err) => {
            tracing::debug!(error = %err, "skipping malformed stream frame");
            return Frame::Skip;
        }
    };

    match chunk.choices.into_iter().next().and_then(|c| c.delta) {
        Some(delta) if !delta.is_empty() => Frame::Delta(delta),
        _ => Frame::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_partial_lines() {
        let mut buffer = LineBuffer::new();

        let lines = buffer.feed(b"data: {\"choices\":");
        assert!(lines.is_empty());
        assert!(buffer.has_buffered_data());

        let lines = buffer.feed(b" []}\ndata: [DONE]\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "data: {\"choices\": []}");
        assert_eq!(lines[1], "data: [DONE]");
        assert!(!buffer.has_buffered_data());
    }

    #[test]
    fn test_line_buffer_skips_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.feed(b"data: a\n\n\ndata: b\n");
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn test_parse_done_sentinel() {
        assert!(matches!(parse_frame("data: [DONE]"), Frame::Done));
    }

    #[test]
    fn test_parse_content_delta() {
        let frame =
            parse_frame(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#);
        match frame {
            Frame::Delta(delta) => assert_eq!(delta.content.as_deref(), Some("Hello")),
            other => panic!("expected Delta, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_role_delta() {
        let frame = parse_frame(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#);
        match frame {
            Frame::Delta(delta) => {
                assert_eq!(delta.role.as_deref(), Some("assistant"));
                assert!(delta.content.is_none());
            }
            other => panic!("expected Delta, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_skips_non_data_lines() {
        assert!(matches!(parse_frame(": keep-alive"), Frame::Skip));
        assert!(matches!(parse_frame("event: message"), Frame::Skip));
    }

    #[test]
    fn test_parse_skips_malformed_json() {
        assert!(matches!(parse_frame("data: {not json"), Frame::Skip));
    }

    #[test]
    fn test_parse_skips_empty_delta() {
        assert!(matches!(
            parse_frame(r#"data: {"choices":[{"delta":{}}]}"#),
            Frame::Skip
        ));
        assert!(matches!(parse_frame(r#"data: {"choices":[]}"#), Frame::Skip));
        assert!(matches!(parse_frame(r#"data: {"id":"x"}"#), Frame::Skip));
    }

    #[test]
    fn test_line_buffer_truncates_oversized_line() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.feed("x".repeat(MAX_BUFFER_SIZE + 1024).as_bytes());
        assert!(lines.is_empty());
        assert!(buffer.buffer.len() <= MAX_BUFFER_SIZE);

        // The buffer keeps working after truncation.
        let lines = buffer.feed(b"\ndata: [DONE]\n");
        assert_eq!(lines.last().map(String::as_str), Some("data: [DONE]"));
    }

    #[test]
    fn test_line_buffer_truncates_on_char_boundary() {
        // A single oversized line of multi-byte characters must not panic
        // when the truncation offset lands mid-character.
        let mut buffer = LineBuffer::new();
        let oversized = "€".repeat(MAX_BUFFER_SIZE / 2);
        let lines = buffer.feed(oversized.as_bytes());
        assert!(lines.is_empty());
        assert!(buffer.buffer.is_char_boundary(0));
        assert!(buffer.buffer.len() <= MAX_BUFFER_SIZE);

        let lines = buffer.feed("\ndata: [DONE]\n".as_bytes());
        assert_eq!(lines.last().map(String::as_str), Some("data: [DONE]"));
    }

    #[test]
    fn test_data_prefix_without_space() {
        let frame = parse_frame(r#"data:{"choices":[{"delta":{"content":"x"}}]}"#);
        assert!(matches!(frame, Frame::Delta(_)));
    }
}
