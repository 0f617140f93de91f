//! HTTP and WebSocket surface
//!
//! - GET /health - Health check
//! - GET /media-stream - Telephony media stream (WebSocket)
//! - GET /test-agent - Browser test harness (WebSocket)
//! - GET /sessions - Live session summaries
//! - GET /sessions/:id - One live session

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
