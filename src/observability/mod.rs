//! Observability: structured logging and span helpers

pub mod logging;

pub use logging::{init_default_logging, init_logging, level_for_verbosity, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{delivery_span, session_span};
