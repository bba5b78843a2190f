//! HTTP surface: the two WebSocket endpoints that carry all relay traffic,
//! plus a small read-only diagnostics API.
//!
//! - GET /ws/glasses - glasses client channel (text control + binary audio)
//! - GET /ws/tpa - TPA channel, one connection per (session, package)
//! - GET /sessions - list live sessions
//! - GET /sessions/:id - one session snapshot
//! - GET /sessions/:id/transcript - caption view + finalized segments
//! - GET /sessions/:id/displays/:package - active display + request history
//! - GET /sessions/:id/subscriptions/:package - current set + change log
//! - GET /health - health check

mod handlers;
mod routes;
mod state;
mod ws;

pub use routes::create_router;
pub use state::AppState;
