//! Incremental decoder for OpenAI-style server-sent events.
//!
//! Bytes arrive in arbitrary chunks; lines are only decoded once complete so
//! multi-byte characters split across chunks survive.

use serde_json::Value;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A non-empty text fragment.
    Text(String),
    /// The server signalled end of stream.
    Done,
    /// The server reported an error object.
    Error(String),
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever remains once the byte stream ends.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }
}

fn decode_line(line: &str) -> Option<SseEvent> {
    let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return Some(SseEvent::Error(format!("malformed event: {e}"))),
    };
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Some(SseEvent::Error(message));
    }
    let choice = value.get("choices")?.get(0)?;
    // `/completions` streams `text`; chat-style servers stream `delta.content`.
    let text = choice
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| {
            choice
                .get("delta")
                .and_then(|d| d.get("content"))
                .and_then(Value::as_str)
        })?;
    (!text.is_empty()).then(|| SseEvent::Text(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_and_done() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"choices\":[{\"text\":\"Hel\"}]}\n\ndata: {\"choices\":[{\"text\":\"lo\"}]}\n\ndata: [DONE]\n\n",
        );
        assert_eq!(
            events,
            vec![
                SseEvent::Text("Hel".into()),
                SseEvent::Text("lo".into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"choices\":[{\"te").is_empty());
        let events = decoder.push(b"xt\":\"caf\xc3\xa9\"}]}\n");
        assert_eq!(events, vec![SseEvent::Text("café".into())]);
    }

    #[test]
    fn chat_delta_and_errors() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\ndata: {\"error\":{\"message\":\"overloaded\"}}\n: keepalive\n",
        );
        assert_eq!(
            events,
            vec![
                SseEvent::Text("x".into()),
                SseEvent::Error("overloaded".into())
            ]
        );
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: [DONE]");
        assert_eq!(decoder.finish(), vec![SseEvent::Done]);
    }
}
