//! Transport traits for controller communication.
//!
//! A RAPI connection carries two independent streams over one link: replies
//! and notifications flowing in, command frames flowing out. The reader task
//! owns the inbound half exclusively while senders take turns on the outbound
//! half, so a [`Transport`] is always consumed by [`Transport::split`].
//!
//! Implementations exist for serial ports (`rapi-transport`) and for tests
//! (`MockTransport` in `rapi-test-harness`).

use async_trait::async_trait;

use crate::error::Result;

/// Inbound half of a transport.
#[async_trait]
pub trait TransportRead: Send {
    /// Read available bytes into `buf`, waiting until at least one arrives.
    ///
    /// Returns `Ok(0)` once the link is closed and no more data will arrive.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait TransportWrite: Send {
    /// Write all of `data` and flush it to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Close the outbound side. Later `send()` calls return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;
}

/// A byte-level link to a controller that can be split into halves.
pub trait Transport: Send {
    /// Human-readable name of the link (port path, "mock", ...), for logs.
    fn name(&self) -> &str;

    /// Split into independently owned inbound and outbound halves.
    fn split(self: Box<Self>) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>);
}
