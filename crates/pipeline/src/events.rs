//! Event types flowing into and out of the session controller.

use bytes::Bytes;

use colloquy_config::SettingsPatch;
use colloquy_core::{AudioChunk, Error, TurnState};

use crate::telemetry::TelemetrySnapshot;

/// Inbound events from the client connection.
#[derive(Debug)]
pub enum SessionEvent {
    AudioChunk(AudioChunk),
    /// Text input short-circuits STT: handled as a final transcript with
    /// confidence 1.0.
    TextInput {
        text: String,
    },
    Interrupt,
    PlaybackComplete,
    SettingsUpdate(SettingsPatch),
    TelemetryRequest,
    HistoryRequest,
    Disconnect,
}

/// Outbound events toward the client; the server layer adds timestamps and
/// wire encoding.
#[derive(Debug)]
pub enum ServerEvent {
    StateChange {
        from: TurnState,
        to: TurnState,
    },
    TranscriptPartial {
        text: String,
        confidence: f32,
    },
    TranscriptFinal {
        text: String,
        confidence: f32,
    },
    AgentAudioChunk {
        audio: Bytes,
        chunk_index: u64,
        is_final: bool,
    },
    AgentTextFallback {
        text: String,
        reason: String,
    },
    TurnComplete {
        turn_id: String,
        user_text: String,
        agent_text: String,
        duration_ms: u64,
        was_interrupted: bool,
    },
    Telemetry(TelemetrySnapshot),
    History {
        turns: Vec<(String, String)>,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}

impl ServerEvent {
    pub fn error(error: &Error) -> Self {
        ServerEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
            recoverable: error.recoverable(),
        }
    }
}

/// Internal events from per-turn workers, tagged with the turn generation
/// so events from a cancelled turn are discarded on arrival.
#[derive(Debug)]
pub(crate) enum TurnEvent {
    Sentence {
        generation: u64,
        text: String,
    },
    LlmComplete {
        generation: u64,
        sentences: usize,
    },
    LlmFailed {
        generation: u64,
        error: Error,
    },
    TtsChunk {
        generation: u64,
        audio: Bytes,
    },
    TtsFinished {
        generation: u64,
    },
    TtsFailed {
        generation: u64,
        error: Error,
    },
    PlaybackWatchdog {
        generation: u64,
    },
}
