//! Testing utilities and mock implementations
//!
//! Lets the session and delivery layers be tested without a real broker or
//! network.

pub mod mocks;

pub use mocks::*;
