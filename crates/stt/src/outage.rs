//! Audio buffering across connection outages.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Byte-bounded FIFO of audio frames captured while the socket is down.
/// On reconnect only frames younger than the staleness limit are replayed.
pub struct OutageBuffer {
    frames: VecDeque<(Instant, Bytes)>,
    bytes: usize,
    max_bytes: usize,
}

impl OutageBuffer {
    /// `max_bytes` should cover about five seconds of audio at the session's
    /// sample rate (pcm16 mono: `sample_rate * 2 * 5`).
    pub fn new(max_bytes: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            bytes: 0,
            max_bytes,
        }
    }

    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self::new(sample_rate as usize * 2 * 5)
    }

    pub fn push(&mut self, frame: Bytes) {
        self.bytes += frame.len();
        self.frames.push_back((Instant::now(), frame));
        while self.bytes > self.max_bytes {
            if let Some((_, dropped)) = self.frames.pop_front() {
                self.bytes -= dropped.len();
            } else {
                break;
            }
        }
    }

    /// Drain the buffer, returning only frames younger than `max_age`.
    pub fn drain_fresh(&mut self, max_age: Duration) -> Vec<Bytes> {
        let now = Instant::now();
        let fresh: Vec<Bytes> = self
            .frames
            .drain(..)
            .filter(|(at, _)| now.duration_since(*at) < max_age)
            .map(|(_, f)| f)
            .collect();
        self.bytes = 0;
        fresh
    }

    pub fn byte_len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
