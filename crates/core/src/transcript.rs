//! STT event model.

use serde::{Deserialize, Serialize};

/// Events produced by a streaming STT session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SttEvent {
    /// Interim transcript, display-only, never fed to the LLM.
    Partial { text: String, confidence: f32 },
    /// Finalized transcript segment.
    Final { text: String, confidence: f32 },
    /// The service itself confirmed end-of-utterance.
    Endpoint,
    /// Stream-level failure. Non-recoverable errors end the session's STT.
    Error { message: String, recoverable: bool },
}

impl SttEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, SttEvent::Final { .. })
    }
}
