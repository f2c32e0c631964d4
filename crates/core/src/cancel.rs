//! One-shot cooperative cancellation.
//!
//! A `CancellationSignal` is set exactly once and stays set for the life of
//! the turn. Streaming adapters must observe it at every yield point; the
//! controller sets it when speculation is abandoned or the user barges in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    set: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Idempotent: setting twice is indistinguishable from
    /// setting once.
    pub fn set(&self) {
        if !self.inner.set.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is set. Resolves immediately if already set.
    pub async fn cancelled(&self) {
        if self.is_set() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
            if self.is_set() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("set", &self.is_set())
            .finish()
    }
}
