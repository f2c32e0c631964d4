//! Shared application state.

use std::sync::Arc;

use colloquy_config::Settings;
use colloquy_core::{LlmAdapter, Retriever, SttAdapter, TtsAdapter};
use colloquy_persistence::RecordWriter;

use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    pub stt: Arc<dyn SttAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub writer: RecordWriter,
}
