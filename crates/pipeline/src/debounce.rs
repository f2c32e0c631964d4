//! Adaptive debounce control.
//!
//! Tracks the outcomes of the last ten closed turns and nudges the silence
//! debounce: too many speculative cancellations means the window is firing
//! early, so grow it; a consistently clean run lets it shrink back down.

use std::collections::VecDeque;

use colloquy_core::TurnOutcome;

const WINDOW: usize = 10;
const LOWER_RATE: f32 = 0.15;
const STEP_UP_MS: u32 = 50;
const STEP_DOWN_MS: u32 = 25;

#[derive(Debug)]
pub struct AdaptiveDebounce {
    window: VecDeque<bool>,
}

impl AdaptiveDebounce {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW),
        }
    }

    /// Record a closed turn's outcome.
    pub fn observe(&mut self, outcome: TurnOutcome) {
        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window
            .push_back(outcome == TurnOutcome::SpeculativelyCanceled);
    }

    /// Rolling cancellation rate over the window.
    pub fn rate(&self) -> f32 {
        let canceled = self.window.iter().filter(|c| **c).count();
        canceled as f32 / self.window.len().max(1) as f32
    }

    /// Propose the next debounce value given the current one.
    pub fn adjust(&self, current_ms: u32, threshold: f32, min_ms: u32, max_ms: u32) -> u32 {
        let rate = self.rate();
        if rate > threshold {
            let next = (current_ms + STEP_UP_MS).min(max_ms);
            tracing::info!(rate, from = current_ms, to = next, "debounce increased");
            next
        } else if rate < LOWER_RATE {
            let next = current_ms.saturating_sub(STEP_DOWN_MS).max(min_ms);
            if next != current_ms {
                tracing::info!(rate, from = current_ms, to = next, "debounce decreased");
            }
            next
        } else {
            current_ms
        }
    }
}

impl Default for AdaptiveDebounce {
    fn default() -> Self {
        Self::new()
    }
}
