//! Transcript accumulation.
//!
//! Partials are display-only and never reach the LLM. Finals accumulate
//! into the turn's user text. The buffer locks when the turn commits so the
//! prompt cannot change under the in-flight generation.

use colloquy_core::{Error, Result};

#[derive(Debug, Clone)]
struct FinalSegment {
    text: String,
    confidence: f32,
}

#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    partial_text: String,
    finals: Vec<FinalSegment>,
    locked: bool,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current partial. Fails silently while locked.
    pub fn set_partial(&mut self, text: &str) {
        if self.locked {
            tracing::debug!("buffer locked, ignoring partial");
            return;
        }
        self.partial_text = text.to_string();
    }

    /// Append a finalized segment, clearing the partial.
    pub fn append_final(&mut self, text: &str, confidence: f32) -> Result<()> {
        if self.locked {
            return Err(Error::BufferLocked);
        }
        self.partial_text.clear();
        self.finals.push(FinalSegment {
            text: text.to_string(),
            confidence,
        });
        Ok(())
    }

    /// Joined final segments, single-space separated.
    pub fn complete_text(&self) -> String {
        self.finals
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn partial(&self) -> &str {
        &self.partial_text
    }

    pub fn has_finals(&self) -> bool {
        !self.finals.is_empty()
    }

    pub fn avg_confidence(&self) -> f32 {
        if self.finals.is_empty() {
            return 0.0;
        }
        self.finals.iter().map(|s| s.confidence).sum::<f32>() / self.finals.len() as f32
    }

    /// Idempotent.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Idempotent.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Clear everything and unlock. Invoked at turn boundaries.
    pub fn reset(&mut self) {
        self.partial_text.clear();
        self.finals.clear();
        self.locked = false;
    }
}
