//! Adapter traits: the seams between the turn pipeline and the outside world.

mod llm;
mod retriever;
mod store;
mod stt;
mod tts;

pub use llm::LlmAdapter;
pub use retriever::{Retriever, Snippet};
pub use store::TurnStore;
pub use stt::{SttAdapter, SttControl, SttSender, SttSessionConfig, SttStream};
pub use tts::{TtsAdapter, TtsChunk, TtsRequest};
