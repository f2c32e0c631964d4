//! WebSocket server for the colloquy voice agent.
//!
//! One WebSocket connection is one session: the upgrade handler opens an
//! STT stream, spawns the session's turn controller, and wires three tasks
//! around the socket: a reader (client messages in), a writer (server
//! messages out, with heartbeat), and a forwarder (controller events to
//! wire messages).

pub mod http;
pub mod messages;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use messages::{ClientMessage, HistoryEntry, ServerMessage};
pub use session::{Session, SessionManager};
pub use state::AppState;
