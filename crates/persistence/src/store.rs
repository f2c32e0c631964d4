//! In-memory turn store.

use async_trait::async_trait;
use parking_lot::RwLock;

use colloquy_core::{Result, TurnRecord, TurnStore};

/// Default store: turns live in memory for the life of the process. Useful
/// for development and tests; a database-backed store slots in behind the
/// same trait.
#[derive(Default)]
pub struct InMemoryTurnStore {
    records: RwLock<Vec<TurnRecord>>,
}

impl InMemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn records(&self) -> Vec<TurnRecord> {
        self.records.read().clone()
    }

    pub fn for_session(&self, session_id: &str) -> Vec<TurnRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    async fn record(&self, record: &TurnRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }
}
