//! Carriage-return line framing over a raw inbound transport half.

use bytes::BytesMut;
use tracing::{debug, warn};

use rapi_core::Result;
use rapi_core::transport::TransportRead;

use crate::protocol::TERMINATOR;

/// Maximum buffered bytes without a terminator before the buffer is reset.
/// RAPI lines are well under 100 bytes; anything this long is line noise.
pub const MAX_LINE: usize = 1024;

/// Buffers partial reads and yields complete `\r`-terminated lines.
pub struct LineReader {
    inner: Box<dyn TransportRead>,
    buf: BytesMut,
}

impl LineReader {
    pub fn new(inner: Box<dyn TransportRead>) -> Self {
        LineReader {
            inner,
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` at end of stream; a trailing partial line is
    /// dropped. Cancel-safe as long as the underlying `receive` is: bytes
    /// already buffered are kept for the next call.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == TERMINATOR) {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                return Ok(Some(line.to_vec()));
            }

            if self.buf.len() > MAX_LINE {
                warn!(len = self.buf.len(), "line buffer overflow, resetting");
                self.buf.clear();
            }

            let mut chunk = [0u8; 256];
            let n = self.inner.receive(&mut chunk).await?;
            if n == 0 {
                if !self.buf.is_empty() {
                    debug!(len = self.buf.len(), "dropping partial line at end of stream");
                    self.buf.clear();
                }
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
