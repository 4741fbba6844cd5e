//! Streaming response parsers
//!
//! Consumes chunked bytes from a streaming HTTP body and emits decoded text
//! pieces. A carry buffer holds the trailing partial line between chunks,
//! so frames split across network reads (including mid-escape-sequence)
//! decode correctly. All string extraction goes through serde_json and is
//! therefore escape-correct by construction.
//!
//! Framing per wire format:
//!
//! | Format | Framing | Terminator |
//! |--------|---------|------------|
//! | Anthropic-style | `data: {json}` lines | `message_stop` event / stream close |
//! | OpenAI-style | `data: {json}` lines | `data: [DONE]` sentinel |
//! | Gemini-style | `data: {json}` lines | stream close |
//! | Ollama-style | newline-delimited JSON | `"done": true` |

use serde_json::Value;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Anthropic,
    OpenAi,
    Gemini,
    Ollama,
}

/// Token counts the server reported on the stream, when it did.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cached_tokens: Option<u64>,
}

impl ServerUsage {
    /// Whether the server reported anything at all.
    pub fn is_reported(&self) -> bool {
        self.input_tokens.is_some() || self.output_tokens.is_some()
    }
}

pub struct StreamParser {
    format: WireFormat,
    carry: Vec<u8>,
    accumulated: String,
    usage: ServerUsage,
    finished: bool,
}

impl StreamParser {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            carry: Vec::new(),
            accumulated: String::new(),
            usage: ServerUsage::default(),
            finished: false,
        }
    }

    /// Feed one network chunk; returns zero or more decoded text pieces.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut pieces = Vec::new();
        // Process every complete line; the trailing partial stays carried.
        while let Some(newline) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=newline).collect();
            self.process_line(&line[..line.len() - 1], &mut pieces);
        }
        pieces
    }

    /// Flush the carry buffer after the server closed the stream.
    ///
    /// Servers that end without a trailing newline still get their last
    /// frame decoded.
    pub fn finish(&mut self) -> Vec<String> {
        let mut pieces = Vec::new();
        if !self.carry.is_empty() {
            let line = std::mem::take(&mut self.carry);
            self.process_line(&line, &mut pieces);
        }
        pieces
    }

    /// Whether the wire signalled an explicit end of stream.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Everything decoded so far, concatenated.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn server_usage(&self) -> ServerUsage {
        self.usage
    }

    fn process_line(&mut self, raw: &[u8], pieces: &mut Vec<String>) {
        let line = match std::str::from_utf8(raw) {
            Ok(s) => s.trim_end_matches('\r'),
            Err(_) => {
                trace!("dropping non-UTF8 stream line ({} bytes)", raw.len());
                return;
            }
        };
        if line.is_empty() {
            return;
        }

        let payload = match self.format {
            WireFormat::Ollama => line,
            _ => {
                // SSE framing: only data lines carry content.
                let Some(rest) = line.strip_prefix("data:") else {
                    return;
                };
                let rest = rest.trim_start();
                if rest == "[DONE]" {
                    self.finished = true;
                    return;
                }
                rest
            }
        };

        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            trace!("dropping unparseable stream frame: {payload}");
            return;
        };

        self.extract_usage(&value);
        for piece in self.extract_text(&value) {
            self.accumulated.push_str(&piece);
            pieces.push(piece);
        }
    }

    fn extract_text(&mut self, value: &Value) -> Vec<String> {
        let mut out = Vec::new();
        match self.format {
            WireFormat::Anthropic => {
                if value.get("type").and_then(Value::as_str) == Some("message_stop") {
                    self.finished = true;
                }
                if let Some(text) = value
                    .get("delta")
                    .and_then(|d| d.get("text"))
                    .and_then(Value::as_str)
                {
                    out.push(text.to_string());
                }
            }
            WireFormat::OpenAi => {
                if let Some(choices) = value.get("choices").and_then(Value::as_array) {
                    for choice in choices {
                        if let Some(text) = choice
                            .get("delta")
                            .and_then(|d| d.get("content"))
                            .and_then(Value::as_str)
                        {
                            out.push(text.to_string());
                        }
                    }
                }
            }
            WireFormat::Gemini => {
                if let Some(candidates) = value.get("candidates").and_then(Value::as_array) {
                    for candidate in candidates {
                        let parts = candidate
                            .get("content")
                            .and_then(|c| c.get("parts"))
                            .and_then(Value::as_array);
                        if let Some(parts) = parts {
                            for part in parts {
                                if let Some(text) = part.get("text").and_then(Value::as_str) {
                                    out.push(text.to_string());
                                }
                            }
                        }
                    }
                }
            }
            WireFormat::Ollama => {
                if value.get("done").and_then(Value::as_bool) == Some(true) {
                    self.finished = true;
                }
                let text = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_str)
                    .or_else(|| value.get("response").and_then(Value::as_str));
                if let Some(text) = text
                    && !text.is_empty()
                {
                    out.push(text.to_string());
                }
            }
        }
        out
    }

    fn extract_usage(&mut self, value: &Value) {
        fn read(value: &Value, path: &[&str]) -> Option<u64> {
            let mut cur = value;
            for key in path {
                cur = cur.get(key)?;
            }
            cur.as_u64()
        }

        match self.format {
            WireFormat::Anthropic => {
                // input tokens arrive on message_start, output on message_delta
                if let Some(n) = read(value, &["message", "usage", "input_tokens"]) {
                    self.usage.input_tokens = Some(n);
                }
                if let Some(n) = read(value, &["message", "usage", "cache_read_input_tokens"]) {
                    self.usage.cached_tokens = Some(n);
                }
                if let Some(n) = read(value, &["usage", "output_tokens"]) {
                    self.usage.output_tokens = Some(n);
                }
            }
            WireFormat::OpenAi => {
                if let Some(n) = read(value, &["usage", "prompt_tokens"]) {
                    self.usage.input_tokens = Some(n);
                }
                if let Some(n) = read(value, &["usage", "completion_tokens"]) {
                    self.usage.output_tokens = Some(n);
                }
                if let Some(n) = read(value, &["usage", "prompt_tokens_details", "cached_tokens"]) {
                    self.usage.cached_tokens = Some(n);
                }
            }
            WireFormat::Gemini => {
                // usageMetadata is not consistently present on the stream;
                // callers fall back to the heuristic when it never appears.
                if let Some(n) = read(value, &["usageMetadata", "promptTokenCount"]) {
                    self.usage.input_tokens = Some(n);
                }
                if let Some(n) = read(value, &["usageMetadata", "candidatesTokenCount"]) {
                    self.usage.output_tokens = Some(n);
                }
                if let Some(n) = read(value, &["usageMetadata", "cachedContentTokenCount"]) {
                    self.usage.cached_tokens = Some(n);
                }
            }
            WireFormat::Ollama => {
                if let Some(n) = read(value, &["prompt_eval_count"]) {
                    self.usage.input_tokens = Some(n);
                }
                if let Some(n) = read(value, &["eval_count"]) {
                    self.usage.output_tokens = Some(n);
                }
            }
        }
    }
}
