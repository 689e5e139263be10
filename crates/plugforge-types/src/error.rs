use thiserror::Error;

/// Errors from repository operations (used by trait definitions in plugforge-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised by the upstream model transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection attempt timed out after {0}s")]
    Timeout(u64),

    #[error("upstream API key is not configured")]
    MissingApiKey,

    #[error("upstream socket is not open")]
    NotOpen,

    #[error("failed to encode upstream frame: {0}")]
    Encode(String),
}

/// Why an inbound client frame was rejected.
///
/// The display text is what the client sees after the
/// `"Invalid message format: "` prefix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientProtocolError {
    #[error("{0}")]
    InvalidJson(String),

    #[error("Message field is missing in the request")]
    MissingMessage,

    #[error("Message field must be a string")]
    NotAString,

    #[error("Message field cannot be empty")]
    EmptyMessage,
}

/// Configuration values that cannot drive a relay session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
