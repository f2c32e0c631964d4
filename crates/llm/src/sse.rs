//! SSE line parsing for the chat completions stream.

use serde::Deserialize;

use colloquy_core::StreamChunk;

#[derive(Debug, Deserialize)]
struct SseCompletion {
    #[serde(default)]
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: SseDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Accumulates raw bytes and yields complete SSE `data:` payload lines.
#[derive(Default)]
pub struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if let Some(payload) = line.strip_prefix("data:") {
                lines.push(payload.trim().to_string());
            }
        }
        lines
    }
}

/// Parse one SSE payload line into a stream chunk. Returns `None` for
/// payloads with no usable delta (keep-alives, role-only deltas).
pub fn parse_payload(payload: &str) -> Option<StreamChunk> {
    if payload == "[DONE]" {
        return Some(StreamChunk::final_chunk());
    }
    let parsed: SseCompletion = serde_json::from_str(payload).ok()?;
    let choice = parsed.choices.first()?;
    if let Some(content) = choice.delta.content.as_deref() {
        if !content.is_empty() {
            return Some(StreamChunk::text(content));
        }
    }
    if choice.finish_reason.is_some() {
        return Some(StreamChunk::final_chunk());
    }
    None
}
