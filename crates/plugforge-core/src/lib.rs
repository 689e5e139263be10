//! Relay core and port trait definitions for plugforge.
//!
//! This crate defines the "ports" (repository, identity and upstream
//! transport traits) that the infrastructure layer implements, and the relay
//! session that bridges one client connection to one upstream model
//! connection. It depends only on `plugforge-types` -- never on
//! `plugforge-infra` or any database/socket crate.

pub mod conversation;
pub mod identity;
pub mod relay;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;
