//! Error taxonomy
//!
//! Every error carries a stable wire code (see the `code` method) and a
//! recoverability flag so the server can forward it to the client without
//! inspecting variants.

use thiserror::Error;

use crate::turn::TurnState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: TurnState, to: TurnState },

    #[error("transcript buffer is locked")]
    BufferLocked,

    #[error("audio chunk of {size} bytes exceeds the {max} byte limit")]
    AudioChunkTooLarge { size: usize, max: usize },

    #[error("inbound audio buffer overflow: dropped {dropped} frames")]
    AudioBufferOverflow { dropped: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session expired")]
    SessionExpired,

    #[error("STT service unavailable after {attempts} reconnect attempts")]
    SttUnavailable { attempts: u32 },

    #[error("STT authentication rejected")]
    SttAuth,

    #[error("STT stream error: {message}")]
    SttStream { message: String, recoverable: bool },

    #[error("LLM service unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM authentication rejected")]
    LlmAuth,

    #[error("LLM context length exceeded")]
    LlmContextLength,

    #[error("LLM stream timed out")]
    LlmTimeout,

    #[error("LLM produced no response")]
    LlmEmptyResponse,

    #[error("TTS service unavailable: {0}")]
    TtsUnavailable(String),

    #[error("TTS authentication rejected")]
    TtsAuth,

    #[error("TTS quota exhausted")]
    TtsQuota,

    #[error("TTS stream timed out waiting for the first chunk")]
    TtsTimeout,

    #[error("retrieval timed out")]
    RagTimeout,

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable wire code for the client-facing `error` message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Error::BufferLocked => "WS_BUFFER_LOCKED",
            Error::AudioChunkTooLarge { .. } => "WS_INVALID_AUDIO",
            Error::AudioBufferOverflow { .. } => "AUDIO_BUFFER_OVERFLOW",
            Error::Transport(_) => "WS_TRANSPORT",
            Error::SessionExpired => "SESSION_EXPIRED",
            Error::SttUnavailable { .. } => "STT_UNAVAILABLE",
            Error::SttAuth => "STT_AUTH",
            Error::SttStream { .. } => "STT_STREAM",
            Error::LlmUnavailable(_) => "LLM_UNAVAILABLE",
            Error::LlmAuth => "LLM_AUTH",
            Error::LlmContextLength => "LLM_CONTEXT_LENGTH",
            Error::LlmTimeout => "LLM_TIMEOUT",
            Error::LlmEmptyResponse => "LLM_NO_RESPONSE",
            Error::TtsUnavailable(_) => "TTS_UNAVAILABLE",
            Error::TtsAuth => "TTS_AUTH",
            Error::TtsQuota => "TTS_QUOTA",
            Error::TtsTimeout => "TTS_TIMEOUT",
            Error::RagTimeout => "RAG_TIMEOUT",
            Error::Store(_) => "DB_WRITE_FAILED",
            Error::Config(_) => "UNKNOWN_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }

    /// Whether the session can continue after this error.
    pub fn recoverable(&self) -> bool {
        match self {
            Error::InvalidStateTransition { .. } => false,
            Error::SttAuth | Error::LlmAuth | Error::TtsAuth => false,
            Error::SessionExpired => false,
            Error::SttUnavailable { .. } => false,
            Error::SttStream { recoverable, .. } => *recoverable,
            _ => true,
        }
    }
}
