//! REST API and WebSocket handlers.

pub mod plugin_generator;
pub mod relay_ws;
