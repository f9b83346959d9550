//! Wire-level vocabulary: topic strings and JSON payload envelopes
//!
//! This module implements the topic scheme and the `{"d": {...}}` payload
//! format shared by every event the device publishes and every command it
//! receives.

pub mod payloads;
pub mod topics;

pub use payloads::*;
pub use topics::*;
