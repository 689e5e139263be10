//! Upstream model transports.

pub mod gemini;

pub use gemini::GeminiLiveConnector;
