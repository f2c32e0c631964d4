//! Deterministic turn state machine.
//!
//! Guards every transition against the allowed table; an invalid transition
//! is a programming error surfaced as `Error::InvalidStateTransition` and
//! treated as fatal by the session.

use colloquy_core::{Error, Result, StateTransition, TurnState};

pub struct StateMachine {
    current: TurnState,
    log: Vec<StateTransition>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: TurnState::Idle,
            log: Vec::new(),
        }
    }

    pub fn current(&self) -> TurnState {
        self.current
    }

    /// Whether `to` is reachable from the current state.
    pub fn can_transition(&self, to: TurnState) -> bool {
        use TurnState::*;
        // Teardown and fatal-error paths may reset from anywhere.
        if to == Idle {
            return self.current != Idle;
        }
        matches!(
            (self.current, to),
            (Idle, Listening)
                | (Listening, Listening)
                | (Listening, Speculative)
                | (Speculative, Listening)
                | (Speculative, Committed)
                | (Committed, Speaking)
                | (Committed, Listening)
                | (Speaking, Listening)
        )
    }

    /// Perform a transition, recording it in the per-turn log.
    pub fn transition(&mut self, to: TurnState) -> Result<StateTransition> {
        if !self.can_transition(to) {
            return Err(Error::InvalidStateTransition {
                from: self.current,
                to,
            });
        }
        let record = StateTransition {
            from: self.current,
            to,
            at_ms: chrono::Utc::now().timestamp_millis(),
        };
        tracing::debug!(from = %record.from, to = %record.to, "state transition");
        self.current = to;
        self.log.push(record);
        Ok(record)
    }

    /// Drain the transition log (called when a turn record is built).
    pub fn take_log(&mut self) -> Vec<StateTransition> {
        std::mem::take(&mut self.log)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TurnState::*;

    #[test]
    fn starts_idle() {
        assert_eq!(StateMachine::new().current(), Idle);
    }

    #[test]
    fn happy_path_sequence() {
        let mut m = StateMachine::new();
        for to in [Listening, Speculative, Committed, Speaking, Idle] {
            m.transition(to).unwrap();
        }
        assert_eq!(m.current(), Idle);
        assert_eq!(m.take_log().len(), 5);
    }

    #[test]
    fn speculative_cancel_path() {
        let mut m = StateMachine::new();
        m.transition(Listening).unwrap();
        m.transition(Speculative).unwrap();
        m.transition(Listening).unwrap();
        assert_eq!(m.current(), Listening);
    }

    #[test]
    fn barge_in_paths() {
        let mut m = StateMachine::new();
        m.transition(Listening).unwrap();
        m.transition(Speculative).unwrap();
        m.transition(Committed).unwrap();
        // Pre-audio barge-in.
        m.transition(Listening).unwrap();

        m.transition(Speculative).unwrap();
        m.transition(Committed).unwrap();
        m.transition(Speaking).unwrap();
        // Mid-audio barge-in.
        m.transition(Listening).unwrap();
    }

    #[test]
    fn rejects_invalid_transitions() {
        let mut m = StateMachine::new();
        let err = m.transition(Speaking).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStateTransition {
                from: Idle,
                to: Speaking
            }
        ));
        assert_eq!(m.current(), Idle);
    }

    #[test]
    fn any_state_can_reset_to_idle() {
        for path in [
            vec![Listening],
            vec![Listening, Speculative],
            vec![Listening, Speculative, Committed],
            vec![Listening, Speculative, Committed, Speaking],
        ] {
            let mut m = StateMachine::new();
            for to in path {
                m.transition(to).unwrap();
            }
            m.transition(Idle).unwrap();
            assert_eq!(m.current(), Idle);
        }
    }

    #[test]
    fn idle_to_idle_is_rejected() {
        let mut m = StateMachine::new();
        assert!(m.transition(Idle).is_err());
    }

    #[test]
    fn repeat_transition_is_deterministic() {
        // The same transition attempted from the same state is either
        // accepted both times or rejected both times.
        let mut a = StateMachine::new();
        let mut b = StateMachine::new();
        assert_eq!(
            a.transition(Listening).is_ok(),
            b.transition(Listening).is_ok()
        );
        assert_eq!(
            a.transition(Speaking).is_err(),
            b.transition(Speaking).is_err()
        );
    }
}
