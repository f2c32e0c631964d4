//! Best-effort background writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use colloquy_core::{TurnRecord, TurnStore};

const MAX_WRITE_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Non-blocking front for a `TurnStore`. `enqueue` is synchronous and never
/// waits on I/O; a background task performs the writes with a bounded retry
/// budget and drops records that keep failing.
#[derive(Clone)]
pub struct RecordWriter {
    tx: mpsc::UnboundedSender<TurnRecord>,
    dropped: Arc<AtomicU64>,
}

impl RecordWriter {
    pub fn spawn(store: Arc<dyn TurnStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TurnRecord>();
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_task = dropped.clone();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let mut backoff = INITIAL_BACKOFF;
                let mut written = false;
                for attempt in 1..=MAX_WRITE_ATTEMPTS {
                    match store.record(&record).await {
                        Ok(()) => {
                            written = true;
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                turn_id = %record.turn_id,
                                attempt,
                                error = %e,
                                "turn record write failed"
                            );
                            if attempt < MAX_WRITE_ATTEMPTS {
                                tokio::time::sleep(backoff).await;
                                backoff *= 2;
                            }
                        }
                    }
                }
                if !written {
                    dropped_task.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(turn_id = %record.turn_id, "turn record dropped");
                }
            }
        });

        Self { tx, dropped }
    }

    /// Queue a record for persistence. Never blocks; if the writer task is
    /// gone the record is counted as dropped.
    pub fn enqueue(&self, record: TurnRecord) {
        if self.tx.send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::{Error, Result, TurnLatencies, TurnOutcome};
    use std::sync::atomic::AtomicU32;

    use crate::store::InMemoryTurnStore;

    fn sample() -> TurnRecord {
        TurnRecord {
            turn_id: "s_0".into(),
            session_id: "s".into(),
            started_at_ms: 0,
            finished_at_ms: 1,
            user_text: String::new(),
            agent_text: String::new(),
            outcome: TurnOutcome::Completed,
            state_transitions: Vec::new(),
            was_interrupted: false,
            tokens_prompt: 0,
            tokens_completion: 0,
            tokens_wasted: 0,
            latency: TurnLatencies::default(),
        }
    }

    #[tokio::test]
    async fn writes_through_to_store() {
        let store = Arc::new(InMemoryTurnStore::new());
        let writer = RecordWriter::spawn(store.clone());
        writer.enqueue(sample());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(writer.dropped_count(), 0);
    }

    struct FlakyStore {
        failures_left: AtomicU32,
        inner: InMemoryTurnStore,
    }

    #[async_trait]
    impl TurnStore for FlakyStore {
        async fn record(&self, record: &TurnRecord) -> Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::Store("transient".into()));
            }
            self.inner.record(record).await
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let store = Arc::new(FlakyStore {
            failures_left: AtomicU32::new(2),
            inner: InMemoryTurnStore::new(),
        });
        let writer = RecordWriter::spawn(store.clone());
        writer.enqueue(sample());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.inner.len(), 1);
        assert_eq!(writer.dropped_count(), 0);
    }

    #[tokio::test]
    async fn drops_after_retry_budget() {
        let store = Arc::new(FlakyStore {
            failures_left: AtomicU32::new(10),
            inner: InMemoryTurnStore::new(),
        });
        let writer = RecordWriter::spawn(store.clone());
        writer.enqueue(sample());
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(store.inner.len(), 0);
        assert_eq!(writer.dropped_count(), 1);
    }
}
