//! Incremental decoder for `text/event-stream` bodies.
//!
//! Both remote services stream over SSE: the chat-completions API for tool
//! call deltas, and MCP servers that answer JSON-RPC requests with an event
//! stream. Bytes are buffered until a full line is available so multi-byte
//! characters split across network chunks decode correctly.

/// Collects `data:` payloads, yielding one string per complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Feed raw bytes, returning the data of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(idx) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            self.process_line(line, &mut events);
        }

        events
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.process_line(line.trim_end_matches(|c: char| c == '\n' || c == '\r'), &mut events);
        }
        if !self.data_lines.is_empty() {
            events.push(self.data_lines.join("\n"));
        }
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            // Blank line dispatches the pending event
            if !self.data_lines.is_empty() {
                events.push(std::mem::take(&mut self.data_lines).join("\n"));
            }
            return;
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // `event:`, `id:`, `retry:` and comments carry nothing we use
    }
}
