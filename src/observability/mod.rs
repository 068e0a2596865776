//! Observability for the AVS client
//!
//! Structured logging through `tracing`, with per-connection spans so every
//! line logged on behalf of one connection carries its `connection_id`.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{connection_span, downstream_span, event_span};
