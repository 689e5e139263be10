//! Shared domain types for plugforge.
//!
//! Chat turns and conversation records, principals, the client and upstream
//! wire protocols, relay configuration, and the error enums shared by every
//! layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror,
//! secrecy.

pub mod chat;
pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
