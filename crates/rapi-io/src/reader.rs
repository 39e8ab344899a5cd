//! The reader task.
//!
//! One tokio task owns the inbound half of the transport for the lifetime of
//! the connection. It is the only consumer of inbound bytes: every complete
//! line is decoded exactly once and routed either to the pending exchange
//! (replies) or to the notification sink (`$ST`). Undecodable lines are
//! logged and dropped unless the pending exchange asked to see them.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use rapi_core::Error;

use crate::exchange::PendingSlot;
use crate::lines::LineReader;
use crate::protocol::{self, Frame};
use crate::sink::NotificationSink;

/// Run until the link closes, fails, or `cancel` fires. On exit the slot and
/// sink are closed so waiting senders and observers are released.
pub(crate) async fn reader_loop(
    mut lines: LineReader,
    slot: Arc<PendingSlot>,
    sink: Arc<NotificationSink>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("reader task cancelled");
                break;
            }

            line = lines.read_line() => match line {
                Ok(Some(line)) => handle_line(&line, &slot, &sink),
                Ok(None) => {
                    debug!("transport reached end of stream");
                    break;
                }
                Err(Error::TransportClosed) => {
                    debug!("transport closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    break;
                }
            },
        }
    }

    slot.close();
    sink.close();
}

/// Decode one line and route the result.
pub(crate) fn handle_line(line: &[u8], slot: &PendingSlot, sink: &NotificationSink) {
    if line.trim_ascii().is_empty() {
        return;
    }

    match protocol::decode_frame(line) {
        Ok(Frame::Reply(reply)) => match slot.complete(reply) {
            Ok(code) => trace!(code = %code, "reply delivered"),
            Err(reply) => debug!(?reply, "unexpected reply with no command in flight, discarding"),
        },
        Ok(Frame::Notification(notification)) => {
            debug!(state = %notification.state, "state change");
            sink.publish(notification);
        }
        Err(e) => match slot.fail_decode(e) {
            Ok(code) => debug!(code = %code, "undecodable reply routed to pending command"),
            Err(e) => debug!(
                error = %e,
                line = %String::from_utf8_lossy(line),
                "discarding undecodable line"
            ),
        },
    }
}
