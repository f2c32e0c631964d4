//! Cancellable silence debounce timer.
//!
//! Each `start` arms a fresh task that reports back through the
//! controller's timer channel with a generation number; the controller
//! ignores generations that no longer match, so a cancel-then-fire race
//! cannot commit a dead turn.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct SilenceTimer {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl SilenceTimer {
    pub fn new() -> Self {
        Self {
            task: None,
            generation: 0,
        }
    }

    /// Arm (or restart) the timer. Returns the generation the eventual fire
    /// will carry.
    pub fn start(&mut self, duration: Duration, notify: mpsc::Sender<u64>) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = notify.send(generation).await;
        }));
        tracing::debug!(duration_ms = duration.as_millis() as u64, generation, "silence timer armed");
        generation
    }

    /// Cancel the in-flight timer. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the last armed timer has neither fired nor been cancelled.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// The generation the most recent `start` handed out.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Default for SilenceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SilenceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = SilenceTimer::new();
        let generation = timer.start(Duration::from_millis(400), tx);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(rx.recv().await, Some(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_at_deadline_minus_one() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = SilenceTimer::new();
        timer.start(Duration::from_millis(400), tx);

        tokio::time::advance(Duration::from_millis(399)).await;
        assert!(rx.try_recv().is_err());
        timer.cancel();
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = SilenceTimer::new();
        timer.start(Duration::from_millis(100), tx);
        timer.cancel();
        timer.cancel();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resets_the_deadline_and_bumps_generation() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = SilenceTimer::new();
        let first = timer.start(Duration::from_millis(400), tx.clone());
        tokio::time::advance(Duration::from_millis(300)).await;

        let second = timer.start(Duration::from_millis(400), tx);
        assert!(second > first);

        // The original deadline passes without a fire.
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());

        // The restarted deadline fires with the new generation.
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(rx.recv().await, Some(second));
    }
}
