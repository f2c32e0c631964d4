//! Retrieval seam for RAG context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A ranked snippet returned by the retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    pub source_id: String,
    /// Relevance score in 0..=1, highest first.
    pub score: f32,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve up to `top_k` snippets relevant to `query`, ranked by score.
    /// Callers bound the wait with their own timeout; implementations should
    /// still keep latency small.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>>;

    fn name(&self) -> &str;
}
