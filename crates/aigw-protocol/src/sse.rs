//! Incremental server-sent-events codec.
//!
//! The decoder owns a byte accumulator: callers push arbitrarily split
//! chunks and get back only the events whose terminating blank line has
//! arrived. The retained tail is carried into the next push.

/// Terminator payload closing an OpenAI-style SSE stream. Not JSON.
pub const DONE_DATA: &str = "[DONE]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data == DONE_DATA
    }
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk and returns every event completed by it. Partial
    /// trailing bytes (including a split multi-byte character) stay
    /// buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();

            if line.is_empty() {
                self.flush_event(&mut events);
            } else {
                self.consume_field(&line);
            }
        }

        events
    }

    /// Flushes an event whose stream ended without a trailing blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.consume_field(&line);
        }
        let mut events = Vec::new();
        self.flush_event(&mut events);
        events
    }

    fn consume_field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = (!value.is_empty()).then(|| value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
    }

    fn flush_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
    }
}

/// Renders one `data:` event, blank-line terminated.
pub fn write_data_event(out: &mut Vec<u8>, data: &str) {
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(data.as_bytes());
    out.extend_from_slice(b"\n\n");
}

/// Renders the `[DONE]` sentinel.
pub fn write_done_event(out: &mut Vec<u8>) {
    write_data_event(out, DONE_DATA);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_events() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "{\"b\":2}");
    }

    #[test]
    fn retains_partial_tail() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"a\"").is_empty());
        let events = parser.push(b":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn split_multibyte_character_survives() {
        let text = "data: h\u{00e9}llo\n\n".as_bytes();
        // Split in the middle of the two-byte e-acute.
        let cut = text.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut parser = SseParser::new();
        assert!(parser.push(&text[..cut]).is_empty());
        let events = parser.push(&text[cut..]);
        assert_eq!(events[0].data, "h\u{00e9}llo");
    }

    #[test]
    fn named_events_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.push(b": ping\nevent: message_start\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn multiline_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn done_sentinel() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn crlf_lines() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: x\r\n\r\n");
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events[0].data, "tail");
    }
}
