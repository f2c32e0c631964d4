//! Streaming TTS adapter seam.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::cancel::CancellationSignal;
use crate::error::Result;

/// One synthesized audio chunk. The last chunk of a stream carries
/// `is_final = true` (and may have empty audio).
#[derive(Debug, Clone)]
pub struct TtsChunk {
    pub audio: Bytes,
    pub is_final: bool,
}

/// Synthesis request for one sentence.
#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    /// Session-level voice override; the adapter's configured default
    /// applies when absent.
    pub voice_id: Option<String>,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_id: None,
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }
}

#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Stream synthesized audio for one sentence. The adapter must stop
    /// producing promptly once `cancel` is set. A single transient failure
    /// is retried inside the adapter; errors surfacing here are permanent
    /// for the turn.
    async fn stream_audio(
        &self,
        request: TtsRequest,
        cancel: CancellationSignal,
    ) -> Result<mpsc::Receiver<Result<TtsChunk>>>;

    /// Warm the persistent connection on session start. Failures are
    /// non-fatal.
    async fn prewarm(&self) -> Result<()> {
        Ok(())
    }
}
