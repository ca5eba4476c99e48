//! Server-Sent Events decoder for OpenAI-style completion streams.

use serde_json::Value;

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A `data:` line carrying a JSON payload.
    Data(Value),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Incremental decoder for `data:` framed streams.
///
/// Buffers partial lines across network chunks, skips `event:`/`id:` lines,
/// comments and keep-alives, and drops payloads that are not valid JSON.
///
/// # Example
///
/// ```
/// use llm_structures::drivers::prompt::sse::{SseDecoder, SseFrame};
///
/// let mut decoder = SseDecoder::new();
/// let frames = decoder.decode(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
/// assert_eq!(frames.len(), 2);
/// assert_eq!(frames[1], SseFrame::Done);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame completed by them.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(frame) = Self::parse_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left once the byte stream ends.
    pub fn flush(&mut self) -> Vec<SseFrame> {
        let remaining = std::mem::take(&mut self.buffer);
        remaining.lines().filter_map(Self::parse_line).collect()
    }

    fn parse_line(line: &str) -> Option<SseFrame> {
        let data = line.trim().strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            return Some(SseFrame::Done);
        }
        serde_json::from_str::<Value>(data).ok().map(SseFrame::Data)
    }
}
