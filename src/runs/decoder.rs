use bytes::Bytes;

use crate::runs::events::RunEvent;

/// SSE data-field prefix. Only lines carrying this prefix hold payload.
const DATA_PREFIX: &str = "data: ";

/// Incremental decoder for the backend's event stream.
///
/// Transport chunk boundaries are arbitrary: one event may span several
/// chunks and one chunk may hold several events. The decoder keeps the
/// unconsumed tail of the last chunk and only emits events for complete
/// lines. One decoder per stream; create a fresh one for each exchange.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed one transport chunk, returning every event it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<RunEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Byte-level variant of [`feed`](Self::feed) for transports that hand
    /// out raw [`Bytes`]. The stream is text by contract.
    pub fn feed_bytes(&mut self, chunk: &Bytes) -> Vec<RunEvent> {
        self.feed(&String::from_utf8_lossy(chunk))
    }

    /// Flush at end of stream. A stream that closes without a trailing
    /// separator leaves its last frame in the buffer.
    pub fn finish(&mut self) -> Option<RunEvent> {
        let tail = std::mem::take(&mut self.buffer);
        decode_line(&tail)
    }
}

fn decode_line(line: &str) -> Option<RunEvent> {
    let payload = line
        .trim_end_matches(['\r', '\n'])
        .strip_prefix(DATA_PREFIX)?
        .trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Dropping undecodable stream frame: {}", e);
            None
        }
    }
}
