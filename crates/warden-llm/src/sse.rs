//! # SSE Line Decoder
//!
//! Incremental decoder for Server-Sent Events bodies. Bytes arrive in
//! arbitrary chunks; the decoder buffers partial lines and yields the payload
//! of every complete `data:` line. Comments, other fields, empty payloads and
//! the `[DONE]` marker are dropped.
//!
//! The decoder is synchronous so the caller keeps control of reads, errors
//! and cancellation.

use bytes::BytesMut;
use tracing::warn;

/// Buffers SSE bytes and extracts `data:` payloads.
#[derive(Debug)]
pub struct SseLineDecoder {
    buffer: BytesMut,
    saw_done: bool,
}

impl Default for SseLineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseLineDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            saw_done: false,
        }
    }

    /// Feed a chunk and return the payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    if let Some(data) = self.extract(text) {
                        out.push(data);
                    }
                }
                Err(e) => warn!(error = %e, "skipping non-UTF-8 SSE line"),
            }
        }
        out
    }

    /// Flush an unterminated trailing line once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        let text = std::str::from_utf8(&rest).ok()?.trim().to_owned();
        self.extract(&text)
    }

    /// Whether a `[DONE]` marker has been seen.
    pub fn saw_done(&self) -> bool {
        self.saw_done
    }

    fn extract(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return None;
        }
        let data = trimmed
            .strip_prefix("data:")
            .map(str::trim)?;
        if data == "[DONE]" {
            self.saw_done = true;
            return None;
        }
        if data.is_empty() {
            return None;
        }
        Some(data.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
