//! Retrieval for speculative prompt augmentation.
//!
//! The controller consults the retriever during the silence debounce under a
//! hard timeout, so the implementation here is a pure in-memory lexical
//! index: token-overlap scoring, a minimum-score filter, and a small query
//! cache. Latency is bounded by construction.

mod retriever;

pub use retriever::{LexicalRetriever, RetrieverConfig};
