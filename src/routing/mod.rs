//! Inbound message routing
//!
//! [`MessageRouter`] classifies command topics by substring and applies the
//! matching handler to the session state.

pub mod router;

pub use router::{MessageRouter, RouteError, RouteKind};
