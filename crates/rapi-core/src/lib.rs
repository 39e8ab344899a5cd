//! rapi-core: core types, transport traits and errors for the OpenEVSE RAPI
//! client.
//!
//! This crate defines the protocol-agnostic vocabulary the rest of the
//! workspace shares. Protocol mechanics live in `rapi-io`; concrete links in
//! `rapi-transport`.
//!
//! # Key types
//!
//! - [`Command`] / [`Reply`] -- one request/response exchange
//! - [`Notification`] / [`EvseState`] -- asynchronous state changes
//! - [`ChecksumMode`] -- per-send frame integrity selection
//! - [`Transport`] -- byte-level link, split into read and write halves
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::Notification;
pub use transport::{Transport, TransportRead, TransportWrite};
pub use types::{ChecksumMode, Command, EvseState, Outcome, ParseChecksumModeError, Reply};
