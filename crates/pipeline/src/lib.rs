//! The per-session turn pipeline.
//!
//! A single task per session multiplexes every event source (client
//! messages, STT events, the silence timer, LLM sentences, TTS chunks)
//! and dispatches to the state machine. All session state lives on that
//! task; workers communicate through generation-tagged events so anything
//! outlived by a cancellation is ignored.

pub mod audio;
pub mod controller;
pub mod correction;
pub mod debounce;
pub mod events;
pub mod history;
pub mod prompt;
pub mod segment;
pub mod silence;
pub mod state;
pub mod telemetry;
pub mod transcript;

pub use audio::InboundAudioRing;
pub use controller::{ControllerHandles, TurnController};
pub use debounce::AdaptiveDebounce;
pub use events::{ServerEvent, SessionEvent};
pub use history::ConversationHistory;
pub use segment::SentenceSegmenter;
pub use silence::SilenceTimer;
pub use state::StateMachine;
pub use telemetry::{SessionTelemetry, TelemetrySnapshot};
pub use transcript::TranscriptBuffer;
