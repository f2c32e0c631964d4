//! Wire message types: framed JSON with a `{"type": ..., "data": {...}}`
//! envelope in both directions.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use colloquy_config::SettingsPatch;
use colloquy_core::{AudioFormat, TurnState};
use colloquy_pipeline::ServerEvent;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Client-to-server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Connect {},
    AudioChunk {
        /// Base64-encoded audio payload.
        audio: String,
        format: AudioFormat,
        sample_rate: u32,
    },
    /// Text input bypassing STT (treated as a final transcript).
    TextInput {
        text: String,
    },
    Interrupt {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    PlaybackComplete {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    UpdateSettings(SettingsPatch),
    GetHistory {},
    GetTelemetry {},
    Disconnect {},
    Ping {},
    Pong {},
}

/// One completed turn in a `history` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user_text: String,
    pub agent_text: String,
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionReady {
        session_id: String,
        timestamp: i64,
    },
    StateChange {
        from_state: TurnState,
        to_state: TurnState,
        timestamp: i64,
    },
    TranscriptPartial {
        text: String,
        confidence: f32,
        timestamp: i64,
    },
    TranscriptFinal {
        text: String,
        confidence: f32,
        timestamp: i64,
    },
    AgentAudioChunk {
        /// Base64-encoded audio payload; empty on the trailing final marker.
        audio: String,
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
        timestamp: i64,
    },
    Telemetry {
        cancellation_rate: f32,
        avg_debounce_ms: u32,
        turn_latency_ms: u64,
        total_turns: u64,
        tokens_wasted: u64,
        interruption_count: u64,
    },
    History {
        turns: Vec<HistoryEntry>,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
        timestamp: i64,
    },
    Ping {},
}

impl ServerMessage {
    pub fn session_ready(session_id: impl Into<String>) -> Self {
        ServerMessage::SessionReady {
            session_id: session_id.into(),
            timestamp: now_ms(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
            recoverable,
            timestamp: now_ms(),
        }
    }
}

impl From<ServerEvent> for ServerMessage {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::StateChange { from, to } => ServerMessage::StateChange {
                from_state: from,
                to_state: to,
                timestamp: now_ms(),
            },
            ServerEvent::TranscriptPartial { text, confidence } => {
                ServerMessage::TranscriptPartial {
                    text,
                    confidence,
                    timestamp: now_ms(),
                }
            }
            ServerEvent::TranscriptFinal { text, confidence } => ServerMessage::TranscriptFinal {
                text,
                confidence,
                timestamp: now_ms(),
            },
            ServerEvent::AgentAudioChunk {
                audio,
                chunk_index,
                is_final,
            } => ServerMessage::AgentAudioChunk {
                audio: BASE64.encode(&audio),
                chunk_index,
                is_final,
            },
            ServerEvent::AgentTextFallback { text, reason } => {
                ServerMessage::AgentTextFallback { text, reason }
            }
            ServerEvent::TurnComplete {
                turn_id,
                user_text,
                agent_text,
                duration_ms,
                was_interrupted,
            } => ServerMessage::TurnComplete {
                turn_id,
                user_text,
                agent_text,
                duration_ms,
                was_interrupted,
                timestamp: now_ms(),
            },
            ServerEvent::Telemetry(snapshot) => ServerMessage::Telemetry {
                cancellation_rate: snapshot.cancellation_rate,
                avg_debounce_ms: snapshot.avg_debounce_ms,
                turn_latency_ms: snapshot.turn_latency_ms,
                total_turns: snapshot.total_turns,
                tokens_wasted: snapshot.tokens_wasted,
                interruption_count: snapshot.interruption_count,
            },
            ServerEvent::History { turns } => ServerMessage::History {
                turns: turns
                    .into_iter()
                    .map(|(user_text, agent_text)| HistoryEntry {
                        user_text,
                        agent_text,
                    })
                    .collect(),
            },
            ServerEvent::Error {
                code,
                message,
                recoverable,
            } => ServerMessage::Error {
                code,
                message,
                recoverable,
                timestamp: now_ms(),
            },
        }
    }
}
