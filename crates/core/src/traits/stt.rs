//! Streaming STT adapter seam.
//!
//! The session is a channel-based duplex: audio bytes go in, transcript
//! events come out. The adapter owns the network connection (and its
//! reconnect policy) behind these channels.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::transcript::SttEvent;

/// Per-session STT configuration.
#[derive(Debug, Clone)]
pub struct SttSessionConfig {
    pub sample_rate: u32,
    pub punctuate: bool,
    pub interim_results: bool,
    /// Endpointing hint forwarded to the service, in milliseconds.
    pub endpointing_ms: u32,
}

impl Default for SttSessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            punctuate: true,
            interim_results: true,
            endpointing_ms: 600,
        }
    }
}

/// Control frames for an open STT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttControl {
    /// Force the current utterance to be finalized (used on barge-in so the
    /// post-interrupt LISTENING state does not deadlock on an endpoint).
    Finalize,
    Close,
}

/// An open STT session.
pub struct SttStream {
    pub audio: mpsc::Sender<Bytes>,
    pub events: mpsc::Receiver<SttEvent>,
    pub control: mpsc::Sender<SttControl>,
}

impl SttStream {
    /// Split into the send half (kept by the controller) and the event
    /// receiver (consumed by the controller's select loop).
    pub fn split(self) -> (SttSender, mpsc::Receiver<SttEvent>) {
        (
            SttSender {
                audio: self.audio,
                control: self.control,
            },
            self.events,
        )
    }
}

/// The send half of an open STT session.
#[derive(Clone)]
pub struct SttSender {
    audio: mpsc::Sender<Bytes>,
    control: mpsc::Sender<SttControl>,
}

impl SttSender {
    /// Push an audio frame. Drops silently if the session has closed; the
    /// event stream carries the corresponding error.
    pub async fn send(&self, frame: Bytes) {
        if self.audio.send(frame).await.is_err() {
            tracing::debug!("stt session closed, dropping audio frame");
        }
    }

    pub async fn finalize(&self) {
        let _ = self.control.send(SttControl::Finalize).await;
    }

    pub async fn close(&self) {
        let _ = self.control.send(SttControl::Close).await;
    }
}

#[async_trait]
pub trait SttAdapter: Send + Sync {
    /// Open a streaming session. The returned stream is live until `close`
    /// or a non-recoverable error event.
    async fn open(&self, config: SttSessionConfig) -> Result<SttStream>;
}
