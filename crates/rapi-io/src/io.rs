//! Connection handle and command dispatcher.
//!
//! [`spawn_io_task`] splits a transport, hands the inbound half to a
//! dedicated reader task and returns a [`RapiIo`] that owns the outbound
//! half. Any number of tasks may share a `RapiIo` (behind an `Arc`) and send
//! commands concurrently:
//!
//! 1. The sender acquires send rights (the writer lock). Under
//!    [`SendPolicy::Block`] it waits its turn; under
//!    [`SendPolicy::FailFast`] it gets [`Error::Busy`] instead.
//! 2. It registers a pending exchange, then writes the frame.
//! 3. It waits for the reader task to deliver the next `$OK`/`$NK`, or for
//!    the deadline to pass, and releases send rights.
//!
//! Exactly one command is outstanding at any time, which is what makes
//! matching replies by arrival order sound. Notifications are never
//! consumed as replies; they go to every [`Subscription`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use rapi_core::error::{Error, Result};
use rapi_core::transport::{Transport, TransportWrite};
use rapi_core::{ChecksumMode, Command, Outcome, Reply};

use crate::exchange::PendingSlot;
use crate::lines::LineReader;
use crate::protocol;
use crate::reader::reader_loop;
use crate::sink::{NotificationSink, Subscription, SubscriptionId};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What a sender does when another command is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPolicy {
    /// Wait for send rights; concurrent callers are served in turn.
    #[default]
    Block,
    /// Fail immediately with [`Error::Busy`].
    FailFast,
}

/// Configuration for a RAPI connection.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Checksum mode used by [`RapiIo::send`].
    pub checksum_mode: ChecksumMode,
    /// Reply deadline, measured from the moment the frame is written.
    pub command_timeout: Duration,
    /// Behavior when another command is in flight.
    pub send_policy: SendPolicy,
    /// Resend an `SE` (echo) command once if its reply cannot be decoded.
    ///
    /// While echo is on, the controller's first answer to `SE` may be the
    /// echoed command itself rather than `$OK`.
    pub echo_retry: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            checksum_mode: ChecksumMode::Xor,
            command_timeout: Duration::from_millis(500),
            send_policy: SendPolicy::Block,
            echo_retry: true,
        }
    }
}

/// Handle to one RAPI connection.
///
/// Dropping the handle stops the reader task; [`shutdown`](Self::shutdown)
/// additionally closes the outbound half and waits for the task to finish.
pub struct RapiIo {
    name: String,
    writer: Mutex<Box<dyn TransportWrite>>,
    slot: Arc<PendingSlot>,
    sink: Arc<NotificationSink>,
    config: IoConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Split `transport`, spawn its reader task and return the connection
/// handle. Must be called from within a tokio runtime.
pub fn spawn_io_task(transport: Box<dyn Transport>, config: IoConfig) -> RapiIo {
    let name = transport.name().to_string();
    let (read_half, write_half) = transport.split();

    let slot = Arc::new(PendingSlot::new());
    let sink = Arc::new(NotificationSink::new());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(reader_loop(
        LineReader::new(read_half),
        Arc::clone(&slot),
        Arc::clone(&sink),
        cancel.clone(),
    ));
    debug!(transport = %name, ?config, "RAPI connection opened");

    RapiIo {
        name,
        writer: Mutex::new(write_half),
        slot,
        sink,
        config,
        cancel,
        task: Some(task),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Clears the pending exchange if the sender stops waiting early, whether by
/// timeout, error, or its future being dropped.
struct ExchangeGuard<'a> {
    slot: &'a PendingSlot,
    id: u64,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.slot.cancel(self.id);
    }
}

impl RapiIo {
    /// Send a command using the configured checksum mode and timeout.
    ///
    /// Returns the reply for `$OK`; `$NK` becomes [`Error::Rejected`].
    pub async fn send(&self, command: &Command) -> Result<Reply> {
        self.send_with(command, self.config.checksum_mode, self.config.command_timeout)
            .await
    }

    /// Send a command with an explicit checksum mode and reply deadline.
    pub async fn send_with(
        &self,
        command: &Command,
        mode: ChecksumMode,
        timeout: Duration,
    ) -> Result<Reply> {
        if self.slot.is_closed() {
            return Err(Error::TransportClosed);
        }
        let frame = protocol::encode_command(command, mode)?;
        let mut writer = self.acquire().await?;

        let attempts = if self.config.echo_retry && command.code().eq_ignore_ascii_case("SE") {
            2
        } else {
            1
        };
        let mut attempt = 1;
        loop {
            match self
                .exchange(&mut writer, command.code(), &frame, timeout, attempts > 1)
                .await
            {
                Err(e @ (Error::MalformedFrame(_) | Error::ChecksumMismatch { .. }))
                    if attempt < attempts =>
                {
                    warn!(command = %command, error = %e, "undecodable reply, resending");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Write a command without waiting for any reply.
    ///
    /// Used for commands after which the controller does not answer, such as
    /// a reset. A reply that does arrive is discarded as unexpected.
    pub async fn send_silent(&self, command: &Command) -> Result<()> {
        if self.slot.is_closed() {
            return Err(Error::TransportClosed);
        }
        let frame = protocol::encode_command(command, self.config.checksum_mode)?;
        let mut writer = self.acquire().await?;
        trace!(frame = %printable(&frame), "sending (no reply expected)");
        writer.send(&frame).await.inspect_err(|e| self.on_write_error(e))
    }

    /// Register a notification observer.
    pub fn subscribe(&self) -> Subscription {
        self.sink.subscribe()
    }

    /// Remove a notification observer. Returns `false` if it was not
    /// registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.sink.unsubscribe(id)
    }

    /// `true` once the link has closed or failed. All sends fail from then
    /// on.
    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    /// Name of the underlying transport.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the reader task and close the outbound half.
    ///
    /// Pending and later sends fail with [`Error::TransportClosed`].
    pub async fn shutdown(mut self) -> Result<()> {
        debug!(
            transport = %self.name,
            subscribers = self.sink.subscriber_count(),
            "shutting down RAPI connection"
        );
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.writer.lock().await.close().await
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, Box<dyn TransportWrite>>> {
        match self.config.send_policy {
            SendPolicy::Block => Ok(self.writer.lock().await),
            SendPolicy::FailFast => self.writer.try_lock().map_err(|_| Error::Busy),
        }
    }

    /// One write and the wait for its reply. The caller holds send rights.
    async fn exchange(
        &self,
        writer: &mut Box<dyn TransportWrite>,
        code: &str,
        frame: &[u8],
        timeout: Duration,
        reports_decode_errors: bool,
    ) -> Result<Reply> {
        let (id, mut rx) = self.slot.register(code, reports_decode_errors)?;
        let _guard = ExchangeGuard {
            slot: &self.slot,
            id,
        };

        trace!(frame = %printable(frame), "sending");
        writer
            .send(frame)
            .await
            .inspect_err(|e| self.on_write_error(e))?;

        let reply = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Error::TransportClosed),
            Err(_) => {
                // The reply may have landed between the deadline firing and
                // the slot being cleared.
                if self.slot.cancel(id) {
                    debug!(code, ?timeout, "timed out waiting for reply");
                    return Err(Error::Timeout);
                }
                match rx.try_recv() {
                    Ok(result) => result?,
                    Err(_) => return Err(Error::Timeout),
                }
            }
        };

        trace!(code, ?reply, "reply received");
        match reply.outcome {
            Outcome::Ok => Ok(reply),
            Outcome::Nk => Err(Error::Rejected {
                params: reply.params,
            }),
        }
    }

    fn on_write_error(&self, err: &Error) {
        warn!(transport = %self.name, error = %err, "write failed");
        if matches!(err, Error::TransportClosed | Error::NotConnected) {
            self.slot.close();
            self.cancel.cancel();
        }
    }
}

impl Drop for RapiIo {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn printable(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame).trim_end().to_string()
}
