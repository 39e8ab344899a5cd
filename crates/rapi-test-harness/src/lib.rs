//! rapi-test-harness: test utilities and mock transports for the RAPI client.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the protocol engine and the convenience layer without a real controller
//! on the other end of a serial cable.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
