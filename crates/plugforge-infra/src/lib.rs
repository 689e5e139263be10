//! Infrastructure layer for plugforge.
//!
//! Contains implementations of the ports defined in `plugforge-core`:
//! SQLite storage for conversations and principals, the Gemini Live
//! WebSocket transport, and the configuration loader.

pub mod config;
pub mod sqlite;
pub mod upstream;
