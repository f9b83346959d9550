//! Testing utilities and mock implementations
//!
//! Lets the session run against a scripted transport instead of a live
//! broker.

pub mod mocks;

pub use mocks::*;
