//! rapi-io: the protocol engine of the OpenEVSE RAPI client.
//!
//! One tokio task owns the inbound half of the serial link and decodes every
//! line exactly once. Replies are delivered to the single outstanding command;
//! `$ST` state-change notifications are fanned out to subscribers. Senders
//! share a [`RapiIo`] handle and take turns on the outbound half.
//!
//! # Architecture
//!
//! - [`protocol`] -- frame encode/decode and checksums
//! - [`lines`] -- `\r` line framing over the raw byte stream
//! - [`sink`] -- notification observers
//! - [`io`] -- connection handle, spawn, and the command dispatcher

mod exchange;
pub mod io;
pub mod lines;
pub mod protocol;
mod reader;
pub mod sink;

pub use io::{IoConfig, RapiIo, SendPolicy, spawn_io_task};
pub use protocol::{Frame, checksum, decode_frame, encode_command};
pub use sink::{NotificationSink, Subscription, SubscriptionId};
