//! Per-session settings: the `update_settings` surface.

use serde::{Deserialize, Serialize};

use crate::settings::TurnSettings;

/// Partial settings update from the client. Unknown fields are rejected at
/// the wire layer; out-of-range values are clamped on apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_debounce_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_debounce_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
}

/// Mutable per-session configuration, seeded from process settings and
/// adjusted live by `update_settings` messages and the adaptive debounce.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub debounce_ms: u32,
    pub min_debounce_ms: u32,
    pub max_debounce_ms: u32,
    pub cancellation_threshold: f32,
    pub adaptive_debounce_enabled: bool,
    pub voice_id: Option<String>,
    pub llm_model: Option<String>,
}

impl SessionSettings {
    pub fn from_turn_settings(turn: &TurnSettings) -> Self {
        Self {
            debounce_ms: turn
                .initial_debounce_ms
                .clamp(turn.min_debounce_ms, turn.max_debounce_ms),
            min_debounce_ms: turn.min_debounce_ms,
            max_debounce_ms: turn.max_debounce_ms,
            cancellation_threshold: turn.cancellation_threshold,
            adaptive_debounce_enabled: turn.adaptive_debounce_enabled,
            voice_id: None,
            llm_model: None,
        }
    }

    /// Apply a patch, clamping values into their allowed ranges. Applied
    /// immediately; the next timer start picks up the new debounce.
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(ms) = patch.silence_debounce_ms {
            let clamped = ms.clamp(self.min_debounce_ms, self.max_debounce_ms);
            if clamped != ms {
                tracing::warn!(requested = ms, clamped, "silence_debounce_ms clamped");
            }
            self.debounce_ms = clamped;
        }
        if let Some(t) = patch.cancellation_threshold {
            self.cancellation_threshold = t.clamp(0.10, 0.50);
        }
        if let Some(enabled) = patch.adaptive_debounce_enabled {
            self.adaptive_debounce_enabled = enabled;
        }
        if let Some(voice) = patch.voice_id {
            self.voice_id = Some(voice);
        }
        if let Some(model) = patch.llm_model {
            self.llm_model = Some(model);
        }
    }

    /// Clamp a proposed debounce into this session's bounds.
    pub fn clamp_debounce(&self, ms: u32) -> u32 {
        ms.clamp(self.min_debounce_ms, self.max_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings::from_turn_settings(&TurnSettings::default())
    }

    #[test]
    fn patch_clamps_debounce() {
        let mut s = settings();
        s.apply(SettingsPatch {
            silence_debounce_ms: Some(5000),
            ..Default::default()
        });
        assert_eq!(s.debounce_ms, 1200);

        s.apply(SettingsPatch {
            silence_debounce_ms: Some(100),
            ..Default::default()
        });
        assert_eq!(s.debounce_ms, 400);
    }

    #[test]
    fn patch_clamps_threshold() {
        let mut s = settings();
        s.apply(SettingsPatch {
            cancellation_threshold: Some(0.9),
            ..Default::default()
        });
        assert!((s.cancellation_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn patch_applies_overrides() {
        let mut s = settings();
        s.apply(SettingsPatch {
            voice_id: Some("nova".into()),
            llm_model: Some("gpt-4o".into()),
            adaptive_debounce_enabled: Some(false),
            ..Default::default()
        });
        assert_eq!(s.voice_id.as_deref(), Some("nova"));
        assert_eq!(s.llm_model.as_deref(), Some("gpt-4o"));
        assert!(!s.adaptive_debounce_enabled);
    }
}
