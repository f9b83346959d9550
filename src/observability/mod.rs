//! Observability: structured logging and span helpers

pub mod logging;

pub use logging::{init_default_logging, init_logging, init_logging_with_level, LogFormat};

pub use logging::{mqtt_span, route_span, session_span};
