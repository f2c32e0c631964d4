//! Streaming LLM adapter.
//!
//! Speaks the OpenAI-compatible chat completions protocol over a pooled
//! `reqwest` client. Token deltas arrive as SSE `data:` lines and are
//! forwarded as `StreamChunk`s; cancellation is observed between chunks and
//! closes the underlying response stream.

mod backend;
mod sse;

pub use backend::{OpenAiCompatLlm, FIRST_TOKEN_WATCHDOG, RETRY_BUDGET};
