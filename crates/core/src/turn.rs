//! Turn-taking types: states, outcomes, and the persisted record.

use serde::{Deserialize, Serialize};

/// Voice agent turn states.
///
/// IDLE: no activity, waiting for user input.
/// LISTENING: receiving user audio, transcribing.
/// SPECULATIVE: silence debounce running, LLM output held off the wire.
/// COMMITTED: user intent confirmed, held output released to TTS.
/// SPEAKING: agent audio is streaming (interruptible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    Idle,
    Listening,
    Speculative,
    Committed,
    Speaking,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnState::Idle => "IDLE",
            TurnState::Listening => "LISTENING",
            TurnState::Speculative => "SPECULATIVE",
            TurnState::Committed => "COMMITTED",
            TurnState::Speaking => "SPEAKING",
        };
        f.write_str(s)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    SpeculativelyCanceled,
    Interrupted,
    LlmFailed,
    TtsFailed,
}

/// One recorded state machine transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TurnState,
    pub to: TurnState,
    /// Unix epoch milliseconds.
    pub at_ms: i64,
}

/// Latency breakdown for one turn, all in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TurnLatencies {
    /// Silence timer fire to first LLM sentence.
    pub commit_to_first_sentence_ms: Option<u64>,
    /// First LLM sentence to first TTS audio chunk.
    pub first_sentence_to_first_audio_ms: Option<u64>,
    /// Last final transcript to first TTS audio chunk (the headline number).
    pub final_to_first_audio_ms: Option<u64>,
}

/// Persisted record of a closed turn. Writes are best-effort and never
/// block the voice pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: String,
    pub session_id: String,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    pub user_text: String,
    pub agent_text: String,
    pub outcome: TurnOutcome,
    pub state_transitions: Vec<StateTransition>,
    pub was_interrupted: bool,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub tokens_wasted: u64,
    pub latency: TurnLatencies,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&TurnState::Speculative).unwrap(),
            "\"SPECULATIVE\""
        );
        let s: TurnState = serde_json::from_str("\"SPEAKING\"").unwrap();
        assert_eq!(s, TurnState::Speaking);
    }

    #[test]
    fn outcome_serializes_snake() {
        assert_eq!(
            serde_json::to_string(&TurnOutcome::SpeculativelyCanceled).unwrap(),
            "\"speculatively_canceled\""
        );
    }
}
