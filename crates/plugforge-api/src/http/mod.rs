//! HTTP layer for plugforge.
//!
//! Axum REST API at `/api/v1/` with API key authentication and envelope
//! responses, plus the `/plugin_generator` relay WebSocket.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
