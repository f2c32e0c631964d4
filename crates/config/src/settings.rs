//! Process-wide settings.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparseable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Streaming STT service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            url: "wss://api.deepgram.com/v1/listen".to_string(),
            api_key: None,
            model: "nova-2".to_string(),
        }
    }
}

/// Streaming LLM service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Base system prompt before any retrieval context is spliced in.
    pub system_prompt: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            system_prompt: "You are a helpful voice assistant. Keep responses concise and \
                            natural for speech. Use conversation history for context, but \
                            answer only the latest user request. Do NOT repeat or restate \
                            previous assistant replies."
                .to_string(),
        }
    }
}

/// Streaming TTS service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub voice_id: String,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.elevenlabs.io".to_string(),
            api_key: None,
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    pub enabled: bool,
    pub top_k: usize,
    pub min_score: f32,
    /// Hard budget for the retrieval wait during speculation.
    pub timeout_ms: u64,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 3,
            min_score: 0.3,
            timeout_ms: 350,
        }
    }
}

/// Turn-taking knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSettings {
    pub min_debounce_ms: u32,
    pub max_debounce_ms: u32,
    pub initial_debounce_ms: u32,
    /// Cancellation-rate threshold above which the debounce grows.
    pub cancellation_threshold: f32,
    pub adaptive_debounce_enabled: bool,
    /// Short debounce used when the STT service itself signals an endpoint.
    pub endpoint_debounce_ms: u32,
    /// Whole-stream guard on the LLM sentence stream.
    pub llm_stream_timeout_ms: u64,
    /// Force-complete the turn if the client never confirms playback.
    pub playback_watchdog_ms: u64,
    /// Telemetry message cadence, in completed turns.
    pub telemetry_every_turns: u64,
    /// Conversation history depth fed back into the prompt.
    pub history_turns: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            min_debounce_ms: 400,
            max_debounce_ms: 1200,
            initial_debounce_ms: 400,
            cancellation_threshold: 0.30,
            adaptive_debounce_enabled: true,
            endpoint_debounce_ms: 100,
            llm_stream_timeout_ms: 15_000,
            playback_watchdog_ms: 15_000,
            telemetry_every_turns: 5,
            history_turns: 10,
        }
    }
}

impl TurnSettings {
    pub fn playback_watchdog(&self) -> Duration {
        Duration::from_millis(self.playback_watchdog_ms)
    }

    pub fn llm_stream_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_stream_timeout_ms)
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub inactivity_timeout_secs: u64,
    /// Bounded outbound queue toward the client; producers suspend when full.
    pub outbound_queue: usize,
    /// Inbound audio ring budget in bytes (~10 s of 16 kHz mono pcm16).
    pub audio_ring_bytes: usize,
    pub frontend_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_sessions: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            inactivity_timeout_secs: 300,
            outbound_queue: 64,
            audio_ring_bytes: 320 * 1024,
            frontend_url: "http://localhost:5173".to_string(),
        }
    }
}

/// All process settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub stt: SttSettings,
    pub llm: LlmSettings,
    pub tts: TtsSettings,
    pub rag: RagSettings,
    pub turn: TurnSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut s = Settings::default();

        if let Some(url) = env_opt("COLLOQUY_STT_URL") {
            s.stt.url = url;
        }
        s.stt.api_key = env_opt("COLLOQUY_STT_API_KEY");
        if let Some(model) = env_opt("COLLOQUY_STT_MODEL") {
            s.stt.model = model;
        }

        if let Some(endpoint) = env_opt("COLLOQUY_LLM_ENDPOINT") {
            s.llm.endpoint = endpoint;
        }
        s.llm.api_key = env_opt("COLLOQUY_LLM_API_KEY");
        if let Some(model) = env_opt("COLLOQUY_LLM_MODEL") {
            s.llm.model = model;
        }
        s.llm.max_tokens = env_or("COLLOQUY_LLM_MAX_TOKENS", s.llm.max_tokens);
        s.llm.temperature = env_or("COLLOQUY_LLM_TEMPERATURE", s.llm.temperature);

        if let Some(endpoint) = env_opt("COLLOQUY_TTS_ENDPOINT") {
            s.tts.endpoint = endpoint;
        }
        s.tts.api_key = env_opt("COLLOQUY_TTS_API_KEY");
        if let Some(voice) = env_opt("COLLOQUY_TTS_VOICE_ID") {
            s.tts.voice_id = voice;
        }

        s.rag.enabled = env_or("COLLOQUY_RAG_ENABLED", s.rag.enabled);
        s.rag.top_k = env_or("COLLOQUY_RAG_TOP_K", s.rag.top_k);
        s.rag.min_score = env_or("COLLOQUY_RAG_MIN_SCORE", s.rag.min_score);
        s.rag.timeout_ms = env_or("COLLOQUY_RAG_TIMEOUT_MS", s.rag.timeout_ms);

        s.turn.min_debounce_ms = env_or("COLLOQUY_MIN_DEBOUNCE_MS", s.turn.min_debounce_ms);
        s.turn.max_debounce_ms = env_or("COLLOQUY_MAX_DEBOUNCE_MS", s.turn.max_debounce_ms);
        s.turn.initial_debounce_ms =
            env_or("COLLOQUY_INITIAL_DEBOUNCE_MS", s.turn.initial_debounce_ms);
        s.turn.cancellation_threshold = env_or(
            "COLLOQUY_CANCELLATION_THRESHOLD",
            s.turn.cancellation_threshold,
        );

        if let Some(host) = env_opt("COLLOQUY_HOST") {
            s.server.host = host;
        }
        s.server.port = env_or("COLLOQUY_PORT", s.server.port);
        s.server.max_sessions = env_or("COLLOQUY_MAX_SESSIONS", s.server.max_sessions);
        if let Some(url) = env_opt("COLLOQUY_FRONTEND_URL") {
            s.server.frontend_url = url;
        }

        s
    }
}
