//! Token-overlap retriever over an in-memory snippet index.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use colloquy_core::{Result, Retriever, Snippet};

/// Retriever configuration.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Scores below this are dropped.
    pub min_score: f32,
    /// Query cache capacity; the cache is cleared when it fills.
    pub cache_capacity: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            cache_capacity: 64,
        }
    }
}

struct IndexedSnippet {
    source_id: String,
    text: String,
    tokens: HashSet<String>,
}

/// Lexical retriever: binary-bag cosine over lowercased word tokens.
pub struct LexicalRetriever {
    config: RetrieverConfig,
    index: RwLock<Vec<IndexedSnippet>>,
    cache: RwLock<HashMap<String, Vec<Snippet>>>,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn normalize_query(query: &str) -> String {
    let mut tokens: Vec<String> = tokenize(query).into_iter().collect();
    tokens.sort();
    tokens.join(" ")
}

impl LexicalRetriever {
    pub fn new(config: RetrieverConfig) -> Self {
        Self {
            config,
            index: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Add one snippet to the index.
    pub fn add_snippet(&self, source_id: impl Into<String>, text: impl Into<String>) {
        let text = text.into();
        let tokens = tokenize(&text);
        if tokens.is_empty() {
            return;
        }
        self.index.write().push(IndexedSnippet {
            source_id: source_id.into(),
            text,
            tokens,
        });
        self.cache.write().clear();
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    fn score(query: &HashSet<String>, doc: &HashSet<String>) -> f32 {
        if query.is_empty() || doc.is_empty() {
            return 0.0;
        }
        let overlap = query.intersection(doc).count() as f32;
        overlap / ((query.len() as f32) * (doc.len() as f32)).sqrt()
    }

    fn rank(&self, query: &str, top_k: usize) -> Vec<Snippet> {
        let query_tokens = tokenize(query);
        let index = self.index.read();
        let mut scored: Vec<Snippet> = index
            .iter()
            .map(|doc| Snippet {
                text: doc.text.clone(),
                source_id: doc.source_id.clone(),
                score: Self::score(&query_tokens, &doc.tokens).min(1.0),
            })
            .filter(|s| s.score >= self.config.min_score)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

#[async_trait]
impl Retriever for LexicalRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>> {
        let key = normalize_query(query);
        if let Some(hit) = self.cache.read().get(&key) {
            tracing::debug!(query = %query, "retriever cache hit");
            return Ok(hit.clone());
        }

        let results = self.rank(query, top_k);

        let mut cache = self.cache.write();
        if cache.len() >= self.config.cache_capacity {
            cache.clear();
        }
        cache.insert(key, results.clone());

        Ok(results)
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever() -> LexicalRetriever {
        let r = LexicalRetriever::new(RetrieverConfig {
            min_score: 0.1,
            cache_capacity: 4,
        });
        r.add_snippet("refunds.md", "Refunds are processed within five business days.");
        r.add_snippet("shipping.md", "Standard shipping takes three to seven days.");
        r.add_snippet("hours.md", "Our support hours are nine to five on weekdays.");
        r
    }

    #[tokio::test]
    async fn ranks_relevant_snippet_first() {
        let r = retriever();
        let results = r.retrieve("how long do refunds take", 2).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].source_id, "refunds.md");
        assert!(results[0].score > 0.0 && results[0].score <= 1.0);
    }

    #[tokio::test]
    async fn respects_top_k() {
        let r = retriever();
        let results = r.retrieve("days", 1).await.unwrap();
        assert!(results.len() <= 1);
    }

    #[tokio::test]
    async fn filters_below_min_score() {
        let r = LexicalRetriever::new(RetrieverConfig {
            min_score: 0.99,
            cache_capacity: 4,
        });
        r.add_snippet("a", "completely unrelated content about weather");
        let results = r.retrieve("refund policy", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn cache_returns_same_results_for_reordered_query() {
        let r = retriever();
        let a = r.retrieve("refunds processed days", 3).await.unwrap();
        let b = r.retrieve("days processed refunds", 3).await.unwrap();
        assert_eq!(a.len(), b.len());
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let r = LexicalRetriever::new(RetrieverConfig::default());
        assert!(r.retrieve("anything", 3).await.unwrap().is_empty());
    }
}
