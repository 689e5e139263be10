//! Conversation persistence port and the service built on top of it.

pub mod repository;
pub mod service;
