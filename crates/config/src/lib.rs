//! Configuration: process-wide settings from the environment plus the
//! per-session settings surface exposed over the wire.
//!
//! Priority is env vars over built-in defaults; missing keys fall back with
//! a debug log rather than failing startup. API keys stay optional at load
//! time so tests and mock-backed sessions work without them.

mod session;
mod settings;

pub use session::{SessionSettings, SettingsPatch};
pub use settings::{
    LlmSettings, RagSettings, ServerSettings, Settings, SttSettings, TtsSettings, TurnSettings,
};
