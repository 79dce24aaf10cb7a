//! Server-Sent Events decoding.
//!
//! Splits a `text/event-stream` body into events on blank-line boundaries and
//! collects the `data:` lines of each event. Used by the MCP transport (for
//! servers that answer a POST with a one-shot event stream) and by the A2A
//! client for `message/stream`.

// ─── Event ───────────────────────────────────────────────────────────────────

/// A single decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
}

// ─── Incremental Decoder ─────────────────────────────────────────────────────

/// Incremental decoder; feed it bytes as they arrive and pull complete events.
///
/// Bytes are buffered raw and only decoded once an event is complete, so a
/// multi-byte character split across two network chunks survives intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes. `\r` is dropped so CRLF framing splits
    /// like LF framing, even when the pair straddles two chunks.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Pop the next complete event, skipping keep-alives and comment-only blocks.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..end])) {
                return Some(event);
            }
        }
        None
    }

    /// Flush whatever is left once the underlying stream has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        if rest.trim().is_empty() {
            return None;
        }
        parse_block(rest.trim_end())
    }
}

/// Decode a complete SSE body into its events.
pub fn parse_sse_body(body: &str) -> Vec<SseEvent> {
    let mut decoder = SseDecoder::new();
    decoder.push(body.as_bytes());

    let mut events = Vec::new();
    while let Some(event) = decoder.next_event() {
        events.push(event);
    }
    if let Some(event) = decoder.finish() {
        events.push(event);
    }
    events
}

/// Parse one blank-line-delimited block. Returns `None` when it has no data.
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_name = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue; // comment / keep-alive
        }
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        } else if let Some(name) = line.strip_prefix("event:") {
            event_name = Some(name.trim().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event: event_name,
        data: data_lines.join("\n"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
