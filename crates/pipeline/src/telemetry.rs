//! Per-session telemetry counters.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const LATENCY_WINDOW: usize = 10;

#[derive(Debug, Default)]
pub struct SessionTelemetry {
    completed_turns: u64,
    total_turns: u64,
    speculative_cancels: u64,
    interruptions: u64,
    tokens_wasted: u64,
    buffer_overflows: u64,
    latencies_ms: VecDeque<u64>,
}

/// Snapshot for the `telemetry` wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub cancellation_rate: f32,
    pub avg_debounce_ms: u32,
    pub turn_latency_ms: u64,
    pub total_turns: u64,
    pub tokens_wasted: u64,
    pub interruption_count: u64,
}

impl SessionTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_completed(&mut self) {
        self.completed_turns += 1;
        self.total_turns += 1;
    }

    pub fn turn_canceled(&mut self) {
        self.speculative_cancels += 1;
        self.total_turns += 1;
    }

    pub fn turn_interrupted(&mut self) {
        self.interruptions += 1;
        self.total_turns += 1;
    }

    pub fn turn_failed(&mut self) {
        self.total_turns += 1;
    }

    pub fn add_wasted_tokens(&mut self, tokens: u64) {
        self.tokens_wasted += tokens;
    }

    pub fn add_buffer_overflows(&mut self, dropped: u64) {
        self.buffer_overflows += dropped;
    }

    /// Record a final-transcript-to-first-audio latency sample.
    pub fn record_latency(&mut self, latency_ms: u64) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }

    pub fn avg_latency_ms(&self) -> u64 {
        if self.latencies_ms.is_empty() {
            return 0;
        }
        self.latencies_ms.iter().sum::<u64>() / self.latencies_ms.len() as u64
    }

    pub fn completed_turns(&self) -> u64 {
        self.completed_turns
    }

    pub fn total_turns(&self) -> u64 {
        self.total_turns
    }

    pub fn cancellation_rate(&self) -> f32 {
        if self.total_turns == 0 {
            return 0.0;
        }
        self.speculative_cancels as f32 / self.total_turns as f32
    }

    pub fn buffer_overflows(&self) -> u64 {
        self.buffer_overflows
    }

    pub fn snapshot(&self, debounce_ms: u32) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cancellation_rate: self.cancellation_rate(),
            avg_debounce_ms: debounce_ms,
            turn_latency_ms: self.avg_latency_ms(),
            total_turns: self.total_turns,
            tokens_wasted: self.tokens_wasted,
            interruption_count: self.interruptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_rate_over_all_turns() {
        let mut t = SessionTelemetry::new();
        t.turn_completed();
        t.turn_canceled();
        t.turn_completed();
        t.turn_canceled();
        assert!((t.cancellation_rate() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn latency_window_averages() {
        let mut t = SessionTelemetry::new();
        assert_eq!(t.avg_latency_ms(), 0);
        t.record_latency(100);
        t.record_latency(300);
        assert_eq!(t.avg_latency_ms(), 200);
        for _ in 0..LATENCY_WINDOW {
            t.record_latency(500);
        }
        assert_eq!(t.avg_latency_ms(), 500);
    }

    #[test]
    fn snapshot_carries_counters() {
        let mut t = SessionTelemetry::new();
        t.turn_interrupted();
        t.add_wasted_tokens(42);
        let snap = t.snapshot(450);
        assert_eq!(snap.avg_debounce_ms, 450);
        assert_eq!(snap.tokens_wasted, 42);
        assert_eq!(snap.interruption_count, 1);
        assert_eq!(snap.total_turns, 1);
    }
}
