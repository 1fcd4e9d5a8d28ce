// ! Framing codec
// !
// ! Module converts events to and from their JSON text form and wraps
// ! payloads for the two HTTP downstream formats: event-stream chunks
// ! (`data: ...` blocks separated by a blank line) and long-poll frames
// ! (`<id>|<data>`).

use crate::core::error::{VibeError, VibeResult};
use crate::protocol::event::{Event, ReplyEnvelope};
use serde_json::Value;

const DATA_FIELD: &str = "data:";
const STREAM_DELIMITER: &[u8] = b"\n\n";
const LONGPOLL_DELIMITER: char = '|';

/// Serialize an event to its JSON text form
pub fn encode_event(event: &Event) -> VibeResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Parse an event, failing with `MalformedFrame` on invalid JSON or a missing `type`
pub fn decode_event(text: &str) -> VibeResult<Event> {
    serde_json::from_str(text).map_err(|e| VibeError::malformed(format!("invalid event: {e}")))
}

/// Interpret the `data` of a `reply` event
pub fn decode_reply_envelope(data: Value) -> VibeResult<ReplyEnvelope> {
    serde_json::from_value(data)
        .map_err(|e| VibeError::malformed(format!("invalid reply envelope: {e}")))
}

/// Whitespace prelude that pushes buffering intermediaries to flush the first real chunk.
pub fn stream_padding(bytes: usize) -> String {
    let mut padding = " ".repeat(bytes);
    padding.push('\n');
    padding
}

/// Wrap a payload as one event-stream block, one `data:` line per payload line.
pub fn encode_stream_chunk(payload: &str) -> String {
    let mut chunk = String::with_capacity(payload.len() + 16);
    for line in payload.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        chunk.push_str("data: ");
        chunk.push_str(line);
        chunk.push('\n');
    }
    chunk.push('\n');
    chunk
}

/// Decode every complete block in `tail + chunk`.
///
/// Returns the payloads in order and the unterminated remainder, which must be
/// passed back as `tail` with the next chunk.
pub fn decode_stream_chunk(chunk: &str, tail: &str) -> (Vec<String>, String) {
    let mut buffer = String::with_capacity(tail.len() + chunk.len());
    buffer.push_str(tail);
    buffer.push_str(chunk);

    let mut payloads = Vec::new();
    let mut rest = buffer.as_str();
    while let Some(pos) = rest.find("\n\n") {
        if let Some(payload) = block_payload(&rest[..pos]) {
            payloads.push(payload);
        }
        rest = &rest[pos + 2..];
    }

    (payloads, rest.to_string())
}

/// Incremental event-stream decoder over raw body bytes.
///
/// Buffers at the byte level so multi-byte characters split across network
/// chunks are reassembled before UTF-8 validation.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    tail: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning every payload it completes
    pub fn feed(&mut self, chunk: &[u8]) -> VibeResult<Vec<String>> {
        self.tail.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = find_delimiter(&self.tail[consumed..]) {
            let block = &self.tail[consumed..consumed + pos];
            let block = std::str::from_utf8(block)
                .map_err(|e| VibeError::malformed(format!("stream block is not UTF-8: {e}")))?;
            if let Some(payload) = block_payload(block) {
                payloads.push(payload);
            }
            consumed += pos + STREAM_DELIMITER.len();
        }

        self.tail.drain(..consumed);
        Ok(payloads)
    }

    /// Bytes buffered while waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.tail.len()
    }
}

fn find_delimiter(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(STREAM_DELIMITER.len())
        .position(|window| window == STREAM_DELIMITER)
}

/// Join the `data:` lines of one block; padding and comment lines carry no payload.
fn block_payload(block: &str) -> Option<String> {
    let lines: Vec<&str> = block
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix(DATA_FIELD))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Frame a queued long-poll message
pub fn encode_longpoll_frame(id: u64, data: &str) -> String {
    format!("{id}{LONGPOLL_DELIMITER}{data}")
}

/// Split a long-poll body into its message id and data.
///
/// Only the first delimiter is significant, so data may itself contain `|` or line breaks.
pub fn decode_longpoll_frame(text: &str) -> VibeResult<(u64, String)> {
    let (prefix, data) = text
        .split_once(LONGPOLL_DELIMITER)
        .ok_or_else(|| VibeError::malformed("long-poll frame has no id delimiter"))?;

    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VibeError::malformed(format!(
            "long-poll frame id '{prefix}' is not numeric"
        )));
    }

    let id = prefix
        .parse::<u64>()
        .map_err(|e| VibeError::malformed(format!("long-poll frame id out of range: {e}")))?;

    Ok((id, data.to_string()))
}

/// Wrap a long-poll body for script-tag transports as `callback("<body>");`
pub fn encode_jsonp(callback: &str, body: &str) -> VibeResult<String> {
    let valid = !callback.is_empty()
        && callback
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
    if !valid {
        return Err(VibeError::protocol(format!(
            "invalid JSONP callback name '{callback}'"
        )));
    }

    Ok(format!("{callback}({});", serde_json::to_string(body)?))
}
