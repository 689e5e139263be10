//! Observability setup for plugforge: structured logging with optional
//! OpenTelemetry span export.

pub mod tracing_setup;
