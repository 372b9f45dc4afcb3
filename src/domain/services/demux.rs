#[cfg(test)]
#[path = "demux_test.rs"]
mod tests;

use crate::domain::models::Segment;
use crate::domain::models::UsageSnapshot;
use crate::domain::models::USAGE_END_MARKER;
use crate::domain::models::USAGE_START_MARKER;

/// Splits a generation body into text and usage events.
///
/// Chunks may break anywhere, including inside a UTF-8 sequence or a sentinel
/// marker. Anything that could still turn into a marker is held back until the
/// next chunk decides it, and released as text by `finish`.
#[derive(Default)]
pub struct StreamDemux {
    pending_bytes: Vec<u8>,
    buffer: String,
    ends_with_newline: bool,
}

fn partial_marker_len(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        if text.ends_with(&marker[..len]) {
            return len;
        }
    }

    return 0;
}

impl StreamDemux {
    pub fn new() -> StreamDemux {
        return StreamDemux::default();
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Segment> {
        self.decode_utf8(chunk);

        let mut segments = vec![];
        loop {
            let Some(start) = self.buffer.find(USAGE_START_MARKER) else {
                let keep = partial_marker_len(&self.buffer, USAGE_START_MARKER);
                let text = self.buffer[..self.buffer.len() - keep].to_string();
                self.buffer.drain(..self.buffer.len() - keep);
                self.emit_text(text, &mut segments);
                break;
            };

            let payload_start = start + USAGE_START_MARKER.len();
            let Some(payload_len) = self.buffer[payload_start..].find(USAGE_END_MARKER) else {
                let text = self.buffer[..start].to_string();
                self.buffer.drain(..start);
                self.emit_text(text, &mut segments);
                break;
            };

            let text = self.buffer[..start].to_string();
            self.emit_text(text, &mut segments);

            let payload = &self.buffer[payload_start..payload_start + payload_len];
            match serde_json::from_str::<UsageSnapshot>(payload.trim()) {
                Ok(snapshot) => segments.push(Segment::Usage(snapshot)),
                Err(err) => {
                    tracing::warn!(error = ?err, payload, "Skipping malformed usage event");
                }
            }

            self.buffer
                .drain(..payload_start + payload_len + USAGE_END_MARKER.len());
        }

        return segments;
    }

    /// Flushes whatever is still held back once the stream ends. An unclosed
    /// usage block is released as text.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut segments = vec![];
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).to_string();
            self.pending_bytes.clear();
            self.buffer += &tail;
        }

        if self.buffer.contains(USAGE_START_MARKER) {
            tracing::warn!("Stream ended inside an unterminated usage event");
        }

        let text = std::mem::take(&mut self.buffer);
        self.emit_text(text, &mut segments);

        return segments;
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);

        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.buffer += text;
                    self.pending_bytes.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer +=
                        std::str::from_utf8(&self.pending_bytes[..valid]).unwrap_or_default();

                    match err.error_len() {
                        // Incomplete sequence at the end, wait for more bytes.
                        None => {
                            self.pending_bytes.drain(..valid);
                            return;
                        }
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }

    fn emit_text(&mut self, text: String, segments: &mut Vec<Segment>) {
        if text.is_empty() {
            return;
        }

        // Transports can double up blank lines around injected events.
        if text == "\n" && self.ends_with_newline {
            return;
        }

        self.ends_with_newline = text.ends_with('\n');
        segments.push(Segment::Text(text));
    }
}
