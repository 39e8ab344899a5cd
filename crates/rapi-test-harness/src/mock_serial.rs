//! Mock transport for deterministic testing of RAPI code.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. Each frame written to the outbound half is matched
//! against the next expectation; the paired response is then fed to the
//! inbound half, where the reader task picks it up like bytes arriving from a
//! controller. Bytes can also be injected at any time to simulate unsolicited
//! `$ST` notifications, and the link can be dropped from the test side.
//!
//! # Example
//!
//! ```
//! use rapi_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the client sends "$GS^30\r", answer with "$OK 3 120^20\r".
//! mock.expect(b"$GS^30\r", b"$OK 3 120^20\r");
//! let handle = mock.handle();
//! assert_eq!(handle.remaining_expectations(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rapi_core::error::{Error, Result};
use rapi_core::transport::{Transport, TransportRead, TransportWrite};

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes delivered inbound once the request is seen. Empty means the
    /// controller stays silent.
    response: Vec<u8>,
    /// Hold the response back this long after the request.
    delay: Option<Duration>,
}

#[derive(Debug)]
enum Inbound {
    Data(Vec<u8>),
    Eof,
}

#[derive(Debug)]
struct MockState {
    expectations: VecDeque<Expectation>,
    sent_log: Vec<Vec<u8>>,
    connected: bool,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. If a sent frame does not match the
/// next expectation, or the queue is exhausted, `send()` returns
/// [`Error::Protocol`].
#[derive(Debug)]
pub struct MockTransport {
    state: SharedState,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                sent_log: Vec::new(),
                connected: true,
            })),
            inbound_tx,
            inbound_rx,
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, `response` is
    /// delivered to the inbound half immediately. Pass an empty response to
    /// simulate a controller that never answers.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.push(request, response, None);
    }

    /// Like [`expect`](Self::expect), but deliver the response only after
    /// `delay` has elapsed.
    pub fn expect_delayed(&mut self, request: &[u8], response: &[u8], delay: Duration) {
        self.push(request, response, Some(delay));
    }

    fn push(&mut self, request: &[u8], response: &[u8], delay: Option<Duration>) {
        lock(&self.state).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
            delay,
        });
    }

    /// Queue bytes on the inbound half before the transport is split.
    pub fn inject(&mut self, data: &[u8]) {
        let _ = self.inbound_tx.send(Inbound::Data(data.to_vec()));
    }

    /// A handle that keeps working after the transport has been handed off.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
            inbound_tx: self.inbound_tx.clone(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        let MockTransport {
            state,
            inbound_tx,
            inbound_rx,
        } = *self;
        (
            Box::new(MockReader {
                rx: inbound_rx,
                leftover: Vec::new(),
                eof: false,
            }),
            Box::new(MockWriter { state, inbound_tx }),
        )
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Test-side control of a [`MockTransport`] after it has been split.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: SharedState,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl MockHandle {
    /// Deliver bytes to the inbound half as if the controller sent them.
    pub fn inject(&self, data: &[u8]) {
        let _ = self.inbound_tx.send(Inbound::Data(data.to_vec()));
    }

    /// Drop the link. The inbound half reports end of stream once it has
    /// drained what is already queued; later sends fail with
    /// [`Error::NotConnected`].
    pub fn close(&self) {
        lock(&self.state).connected = false;
        let _ = self.inbound_tx.send(Inbound::Eof);
    }

    /// All data that has been sent through the transport, one element per
    /// `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_log.clone()
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        lock(&self.state).expectations.len()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

// ---------------------------------------------------------------------------
// Halves
// ---------------------------------------------------------------------------

struct MockReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
    leftover: Vec<u8>,
    eof: bool,
}

#[async_trait]
impl TransportRead for MockReader {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.leftover.is_empty() {
            if self.eof {
                return Ok(0);
            }
            match self.rx.recv().await {
                Some(Inbound::Data(data)) => self.leftover = data,
                Some(Inbound::Eof) | None => {
                    self.eof = true;
                    return Ok(0);
                }
            }
        }
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }
}

struct MockWriter {
    state: SharedState,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

#[async_trait]
impl TransportWrite for MockWriter {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let expectation = {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(Error::NotConnected);
            }
            state.sent_log.push(data.to_vec());
            let Some(expectation) = state.expectations.pop_front() else {
                return Err(Error::Protocol(format!(
                    "no more expectations in mock transport (sent {:?})",
                    String::from_utf8_lossy(data)
                )));
            };
            if data != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&expectation.request),
                    String::from_utf8_lossy(data)
                )));
            }
            expectation
        };

        if expectation.response.is_empty() {
            return Ok(());
        }
        match expectation.delay {
            None => {
                let _ = self.inbound_tx.send(Inbound::Data(expectation.response));
            }
            Some(delay) => {
                let tx = self.inbound_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Inbound::Data(expectation.response));
                });
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        lock(&self.state).connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(mock: MockTransport) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        Box::new(mock).split()
    }

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"$GS^30\r", b"$OK 3 120^20\r");
        let (mut reader, mut writer) = split(mock);

        writer.send(b"$GS^30\r").await.unwrap();

        let mut buf = [0u8; 64];
        let n = reader.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$OK 3 120^20\r");
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        mock.expect(b"$FE^27\r", b"$OK^20\r");
        mock.expect(b"$GS^30\r", b"$OK 3 120^20\r");
        let handle = mock.handle();
        let (_reader, mut writer) = split(mock);

        writer.send(b"$FE^27\r").await.unwrap();
        writer.send(b"$GS^30\r").await.unwrap();

        let sent = handle.sent_data();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], b"$FE^27\r");
        assert_eq!(sent[1], b"$GS^30\r");
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"$FE^27\r", b"$OK^20\r");
        let (_reader, mut writer) = split(mock);

        let result = writer.send(b"$FD^26\r").await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
    }

    #[tokio::test]
    async fn mock_transport_no_expectations_errors() {
        let (_reader, mut writer) = split(MockTransport::new());
        let result = writer.send(b"$GS^30\r").await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
    }

    #[tokio::test]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        mock.inject(b"$ST 3\r");
        let (mut reader, _writer) = split(mock);

        let mut buf = [0u8; 4];
        let n = reader.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$ST ");
        let n = reader.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"3\r");
    }

    #[tokio::test]
    async fn mock_transport_close_from_handle() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let (mut reader, mut writer) = split(mock);

        handle.inject(b"$ST 1\r");
        handle.close();
        assert!(!handle.is_connected());

        let mut buf = [0u8; 16];
        assert_eq!(reader.receive(&mut buf).await.unwrap(), 6);
        assert_eq!(reader.receive(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            writer.send(b"$GS^30\r").await.unwrap_err(),
            Error::NotConnected
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_delayed_response() {
        let mut mock = MockTransport::new();
        mock.expect_delayed(b"$GS^30\r", b"$OK 3 120^20\r", Duration::from_millis(200));
        let (mut reader, mut writer) = split(mock);

        let start = tokio::time::Instant::now();
        writer.send(b"$GS^30\r").await.unwrap();
        let mut buf = [0u8; 64];
        let n = reader.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$OK 3 120^20\r");
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
