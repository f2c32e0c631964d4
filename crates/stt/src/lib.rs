//! Duplex streaming STT adapter.
//!
//! Audio bytes flow in over a channel and transcript events flow back out;
//! behind the channels a WebSocket session to the STT service is kept alive
//! with exponential-backoff reconnects. During an outage up to five seconds
//! of audio is buffered and replayed on reconnect, but only frames younger
//! than three seconds; anything staler is discarded.

mod client;
mod messages;
mod outage;

pub use client::StreamingStt;
pub use outage::OutageBuffer;
