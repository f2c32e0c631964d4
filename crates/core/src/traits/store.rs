//! Turn record store seam.

use async_trait::async_trait;

use crate::error::Result;
use crate::turn::TurnRecord;

/// Persistent store for closed turns. Writes are best-effort and must never
/// block the voice pipeline; see the persistence crate's writer.
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn record(&self, record: &TurnRecord) -> Result<()>;
}
