//! Transport implementations for the OpenEVSE RAPI client.
//!
//! This crate provides the concrete implementations of the
//! [`Transport`](rapi_core::Transport) trait from `rapi-core`:
//!
//! - [`SerialTransport`] -- the controller's serial console.
//! - [`HttpTransport`] -- the WiFi kit's `/r?rapi=` HTTP relay.

pub mod http;
pub mod serial;

pub use http::{DEFAULT_HTTP_TIMEOUT, HttpTransport};
pub use serial::{DEFAULT_BAUD_RATE, FlowControl, SerialConfig, SerialTransport};
