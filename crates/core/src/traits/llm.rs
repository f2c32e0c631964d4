//! Streaming LLM adapter seam.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::cancel::CancellationSignal;
use crate::error::Result;
use crate::llm_types::{GenerateRequest, StreamChunk};

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Start a streaming generation. The receiver yields token deltas until
    /// a chunk with `is_final` or an error; the adapter must stop producing
    /// promptly once `cancel` is set and close its network resources.
    ///
    /// Transient failures are retried once inside the adapter within a 5 s
    /// budget; errors surfacing here have crossed that budget.
    async fn stream_chunks(
        &self,
        request: GenerateRequest,
        cancel: CancellationSignal,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>>;

    /// Establish the connection pool ahead of the first real call. Failures
    /// are non-fatal.
    async fn prewarm(&self) -> Result<()> {
        Ok(())
    }

    fn model_name(&self) -> &str;
}
