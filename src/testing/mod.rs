//! Testing utilities and mock implementations
//!
//! Lets the connection lifecycle be tested without the voice service or an
//! OAuth endpoint.

pub mod mocks;

pub use mocks::*;
