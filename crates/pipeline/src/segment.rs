//! Sentence segmentation for the LLM token stream.
//!
//! A sentence ends at `.`, `?` or `!` followed by whitespace; the stream
//! close flushes whatever remains. Abbreviation-splitting is tolerated:
//! short fragments still synthesize fine and latency wins matter more.

pub struct SentenceSegmenter {
    buffer: String,
}

const TERMINATORS: [char; 3] = ['.', '?', '!'];

fn speakable(text: &str) -> bool {
    text.chars().any(|c| c.is_alphanumeric())
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed a token delta, returning any sentences it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        loop {
            let chars: Vec<char> = self.buffer.chars().collect();
            let mut boundary = None;
            for i in 0..chars.len() {
                if TERMINATORS.contains(&chars[i]) {
                    if let Some(next) = chars.get(i + 1) {
                        if next.is_whitespace() {
                            boundary = Some(i + 1);
                            break;
                        }
                    }
                }
            }
            let Some(end) = boundary else { break };

            let sentence: String = chars[..end].iter().collect();
            let rest: String = chars[end..].iter().collect();
            self.buffer = rest.trim_start().to_string();

            let sentence = sentence.trim();
            if !sentence.is_empty() && speakable(sentence) {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Flush the tail on stream close.
    pub fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        let tail = tail.trim();
        if tail.is_empty() || !speakable(tail) {
            None
        } else {
            Some(tail.to_string())
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}
