//! Rolling conversation history fed back into the prompt.

use colloquy_core::Message;

#[derive(Debug, Clone)]
struct HistoryTurn {
    user_text: String,
    agent_text: String,
}

pub struct ConversationHistory {
    turns: Vec<HistoryTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn add_turn(&mut self, user_text: &str, agent_text: &str) {
        if user_text.is_empty() && agent_text.is_empty() {
            return;
        }
        self.turns.push(HistoryTurn {
            user_text: user_text.to_string(),
            agent_text: agent_text.to_string(),
        });
        let len = self.turns.len();
        if len > self.max_turns {
            self.turns.drain(..len - self.max_turns);
        }
    }

    /// Alternating user/assistant messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() * 2);
        for turn in &self.turns {
            if !turn.user_text.is_empty() {
                messages.push(Message::user(&turn.user_text));
            }
            if !turn.agent_text.is_empty() {
                messages.push(Message::assistant(&turn.agent_text));
            }
        }
        messages
    }

    /// (user, agent) pairs for the history wire message.
    pub fn turns(&self) -> Vec<(String, String)> {
        self.turns
            .iter()
            .map(|t| (t.user_text.clone(), t.agent_text.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::Role;

    #[test]
    fn caps_at_max_turns() {
        let mut h = ConversationHistory::new(3);
        for i in 0..5 {
            h.add_turn(&format!("u{i}"), &format!("a{i}"));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.turns()[0].0, "u2");
    }

    #[test]
    fn messages_alternate_roles() {
        let mut h = ConversationHistory::new(10);
        h.add_turn("hello", "hi there");
        let messages = h.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn skips_empty_turns_and_sides() {
        let mut h = ConversationHistory::new(10);
        h.add_turn("", "");
        assert!(h.is_empty());
        h.add_turn("question", "");
        assert_eq!(h.messages().len(), 1);
    }
}
