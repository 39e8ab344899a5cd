//! The single-slot Pending Exchange.
//!
//! RAPI carries no request identifiers: the next `$OK`/`$NK` line read after a
//! command is written is that command's reply. Correlation by arrival order is
//! only sound while at most one command is outstanding, so the slot holds at
//! most one exchange and is only written by a sender that holds the
//! send-rights lock. The reader task completes or fails it; the sender clears
//! it on timeout so a late reply is treated as unexpected.
//!
//! The slot lock is a plain mutex held for a few instructions and never
//! across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use rapi_core::{Error, Reply, Result};

/// Receiving end handed to the sender for one exchange.
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Reply>>;

struct PendingExchange {
    id: u64,
    code: String,
    /// Route decode failures to this exchange instead of discarding them.
    reports_decode_errors: bool,
    reply_tx: oneshot::Sender<Result<Reply>>,
}

#[derive(Default)]
struct SlotState {
    next_id: u64,
    pending: Option<PendingExchange>,
    closed: bool,
}

/// Shared between the dispatcher and the reader task.
#[derive(Default)]
pub(crate) struct PendingSlot {
    state: Mutex<SlotState>,
}

impl PendingSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new exchange for `code`.
    ///
    /// Fails with [`Error::TransportClosed`] once the connection is gone and
    /// with [`Error::Busy`] if an exchange is already outstanding.
    pub(crate) fn register(
        &self,
        code: &str,
        reports_decode_errors: bool,
    ) -> Result<(u64, ReplyReceiver)> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::TransportClosed);
        }
        if state.pending.is_some() {
            return Err(Error::Busy);
        }
        state.next_id += 1;
        let id = state.next_id;
        let (reply_tx, reply_rx) = oneshot::channel();
        state.pending = Some(PendingExchange {
            id,
            code: code.to_string(),
            reports_decode_errors,
            reply_tx,
        });
        Ok((id, reply_rx))
    }

    /// Deliver a reply to the outstanding exchange.
    ///
    /// Gives the reply back if nothing is waiting for it.
    pub(crate) fn complete(&self, reply: Reply) -> std::result::Result<String, Reply> {
        let Some(pending) = self.lock().pending.take() else {
            return Err(reply);
        };
        // A dropped receiver means the sender gave up at the same instant;
        // the reply has been consumed either way.
        let _ = pending.reply_tx.send(Ok(reply));
        Ok(pending.code)
    }

    /// Fail the outstanding exchange with a decode error, if it asked for
    /// them. Gives the error back otherwise.
    pub(crate) fn fail_decode(&self, err: Error) -> std::result::Result<String, Error> {
        let mut state = self.lock();
        match state.pending.take() {
            Some(pending) if pending.reports_decode_errors => {
                let _ = pending.reply_tx.send(Err(err));
                Ok(pending.code)
            }
            other => {
                state.pending = other;
                Err(err)
            }
        }
    }

    /// Clear exchange `id` if it is still outstanding. Returns `false` if it
    /// was already completed.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let mut state = self.lock();
        if state.pending.as_ref().is_some_and(|p| p.id == id) {
            state.pending = None;
            true
        } else {
            false
        }
    }

    /// Mark the connection closed and fail any outstanding exchange.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(pending) = state.pending.take() {
            let _ = pending.reply_tx.send(Err(Error::TransportClosed));
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapi_core::Outcome;

    fn ok_reply() -> Reply {
        Reply {
            outcome: Outcome::Ok,
            params: vec!["3".into()],
        }
    }

    #[test]
    fn complete_delivers_to_registered_exchange() {
        let slot = PendingSlot::new();
        let (_, mut rx) = slot.register("GS", false).unwrap();
        assert_eq!(slot.complete(ok_reply()).unwrap(), "GS");
        assert_eq!(rx.try_recv().unwrap().unwrap(), ok_reply());
        assert!(!slot.is_pending());
    }

    #[test]
    fn complete_without_exchange_returns_reply() {
        let slot = PendingSlot::new();
        assert_eq!(slot.complete(ok_reply()).unwrap_err(), ok_reply());
    }

    #[test]
    fn second_register_is_busy() {
        let slot = PendingSlot::new();
        let _first = slot.register("GS", false).unwrap();
        assert!(matches!(slot.register("GE", false), Err(Error::Busy)));
    }

    #[test]
    fn cancel_only_clears_matching_id() {
        let slot = PendingSlot::new();
        let (first, _rx) = slot.register("GS", false).unwrap();
        assert!(slot.cancel(first));
        let (second, _rx2) = slot.register("GE", false).unwrap();
        assert!(!slot.cancel(first));
        assert!(slot.is_pending());
        assert!(slot.cancel(second));
    }

    #[test]
    fn decode_errors_only_reach_exchanges_that_ask() {
        let slot = PendingSlot::new();
        let (_, _rx) = slot.register("GS", false).unwrap();
        let err = slot
            .fail_decode(Error::MalformedFrame("noise".into()))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
        assert!(slot.is_pending());
        slot.close();

        let slot = PendingSlot::new();
        let (_, mut rx) = slot.register("SE", true).unwrap();
        assert_eq!(
            slot.fail_decode(Error::MalformedFrame("echo".into())).unwrap(),
            "SE"
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn close_fails_pending_and_future_exchanges() {
        let slot = PendingSlot::new();
        let (_, mut rx) = slot.register("GS", false).unwrap();
        slot.close();
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::TransportClosed)));
        assert!(slot.is_closed());
        assert!(matches!(
            slot.register("GS", false),
            Err(Error::TransportClosed)
        ));
    }
}
