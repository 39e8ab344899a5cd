//! HTTP transport for OpenEVSE controllers fitted with the WiFi kit.
//!
//! The WiFi board relays RAPI over HTTP: `GET /r?rapi=<frame>` forwards the
//! frame to the controller and embeds the controller's `$OK`/`$NK` line
//! somewhere in the response body. Each write is one request; the reply line
//! found in the body is handed to the read half as if it had arrived on a
//! serial line.
//!
//! The WiFi board does not forward unsolicited `$ST` notifications, so
//! subscribers see nothing over this transport and a reset cannot be
//! observed.
//!
//! # Example
//!
//! ```no_run
//! use rapi_transport::HttpTransport;
//! use rapi_core::transport::Transport;
//!
//! # fn example() -> rapi_core::Result<()> {
//! let transport = HttpTransport::new("192.168.1.50")?;
//! let (reader, writer) = Box::new(transport).split();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rapi_core::error::{Error, Result};
use rapi_core::transport::{Transport, TransportRead, TransportWrite};

/// Per-request timeout. The WiFi board answers well within this unless the
/// controller is unresponsive.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// A RAPI link through the WiFi kit's HTTP endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for `host` (a hostname or IP address, optionally
    /// with a `http://` prefix and a port).
    pub fn new(host: &str) -> Result<Self> {
        Self::with_timeout(host, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(host: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("HTTP client init failed: {e}")))?;
        let endpoint = rapi_endpoint(host);
        tracing::debug!(endpoint = %endpoint, ?timeout, "HTTP transport created");
        Ok(Self { client, endpoint })
    }

    /// The URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        let HttpTransport { client, endpoint } = *self;
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Box::new(HttpReader {
                rx,
                leftover: Vec::new(),
            }),
            Box::new(HttpWriter {
                client: Some(client),
                endpoint,
                tx: Some(tx),
            }),
        )
    }
}

fn rapi_endpoint(host: &str) -> String {
    let base = host.trim_end_matches('/');
    if base.contains("://") {
        format!("{base}/r")
    } else {
        format!("http://{base}/r")
    }
}

/// Find the controller's reply line in an HTTP response body.
///
/// The body format varies between WiFi firmware versions (HTML page, JSON
/// object, plain text), so the first `$OK`/`$NK` token up to the next line
/// break, quote or tag is taken.
fn extract_reply(body: &str) -> Option<&str> {
    body.match_indices('$').find_map(|(start, _)| {
        let rest = &body[start..];
        let end = rest.find(['\r', '\n', '<', '"']).unwrap_or(rest.len());
        let line = rest[..end].trim_end();
        (line.starts_with("$OK") || line.starts_with("$NK")).then_some(line)
    })
}

struct HttpReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    leftover: Vec<u8>,
}

#[async_trait]
impl TransportRead for HttpReader {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.leftover.is_empty() {
            match self.rx.recv().await {
                Some(line) => self.leftover = line,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }
}

struct HttpWriter {
    client: Option<reqwest::Client>,
    endpoint: String,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl TransportWrite for HttpWriter {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let (Some(client), Some(tx)) = (self.client.as_ref(), self.tx.as_ref()) else {
            return Err(Error::NotConnected);
        };
        let frame = std::str::from_utf8(data)
            .map_err(|_| Error::Encoding("frame is not valid UTF-8".into()))?
            .trim_end_matches('\r');

        tracing::trace!(endpoint = %self.endpoint, frame = %frame, "Sending request");

        let response = client
            .get(&self.endpoint)
            .query(&[("rapi", frame)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %self.endpoint, error = %e, "HTTP request failed");
                Error::Transport(format!("HTTP request to {} failed: {e}", self.endpoint))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "HTTP request to {} returned {status}",
                self.endpoint
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read HTTP response: {e}")))?;

        match extract_reply(&body) {
            Some(line) => {
                tracing::trace!(endpoint = %self.endpoint, reply = %line, "Received reply");
                let mut bytes = line.as_bytes().to_vec();
                bytes.push(b'\r');
                tx.send(bytes).map_err(|_| Error::TransportClosed)
            }
            None => {
                // Leave it to the dispatcher's deadline, as with line noise
                // on a serial link.
                tracing::debug!(endpoint = %self.endpoint, body = %body, "no RAPI reply in response");
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.client.take().is_some() {
            tracing::debug!(endpoint = %self.endpoint, "Closing HTTP transport");
        }
        self.tx = None;
        Ok(())
    }
}
