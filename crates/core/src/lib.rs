//! Core types and traits for the colloquy voice agent
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - Turn-taking types (states, outcomes, records)
//! - Audio chunk and transcript event types
//! - LLM request/response types
//! - One-shot cooperative cancellation
//! - Error taxonomy with wire codes
//! - Adapter traits for the STT/LLM/TTS/retrieval/store seams

pub mod audio;
pub mod cancel;
pub mod error;
pub mod llm_types;
pub mod traits;
pub mod transcript;
pub mod turn;

pub use audio::{AudioChunk, AudioFormat, MAX_AUDIO_CHUNK_BYTES};
pub use cancel::CancellationSignal;
pub use error::{Error, Result};
pub use llm_types::{GenerateRequest, Message, Role, StreamChunk};
pub use transcript::SttEvent;
pub use turn::{StateTransition, TurnLatencies, TurnOutcome, TurnRecord, TurnState};

pub use traits::{
    LlmAdapter, Retriever, Snippet, SttAdapter, SttControl, SttSender, SttSessionConfig,
    SttStream, TtsAdapter, TtsChunk, TtsRequest, TurnStore,
};
