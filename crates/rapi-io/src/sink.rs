//! Fan-out of asynchronous `$ST` notifications to registered observers.
//!
//! Each observer gets its own unbounded queue, so a slow observer never
//! blocks the reader task or loses notifications meant for it. Publishing
//! is a non-blocking push per observer; observers whose receiving end has
//! been dropped are pruned on the next publish.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use rapi_core::Notification;

/// Identifies one registration with a [`NotificationSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<(SubscriptionId, mpsc::UnboundedSender<Notification>)>,
    closed: bool,
}

/// Registry of notification observers.
#[derive(Default)]
pub struct NotificationSink {
    observers: Mutex<Observers>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new observer. It sees every notification published after
    /// this call returns, in arrival order.
    ///
    /// Subscribing to a closed sink yields a subscription that has already
    /// ended.
    pub fn subscribe(&self) -> Subscription {
        let mut observers = self.lock();
        observers.next_id += 1;
        let id = SubscriptionId(observers.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        if !observers.closed {
            observers.list.push((id, tx));
        }
        Subscription { id, rx }
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.lock();
        let before = observers.list.len();
        observers.list.retain(|(oid, _)| *oid != id);
        observers.list.len() != before
    }

    /// Deliver `notification` to every live observer. Returns how many
    /// observers received it.
    pub fn publish(&self, notification: Notification) -> usize {
        let mut observers = self.lock();
        observers
            .list
            .retain(|(_, tx)| tx.send(notification).is_ok());
        let delivered = observers.list.len();
        trace!(state = %notification.state, delivered, "notification published");
        delivered
    }

    /// End every subscription. Observers drain what is already queued, then
    /// see the end of the stream.
    pub fn close(&self) {
        let mut observers = self.lock();
        observers.closed = true;
        observers.list.clear();
    }

    /// Number of registered observers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().list.len()
    }
}

/// Receiving end of one observer registration.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next notification. Returns `None` once the connection
    /// has closed (or the subscription was removed) and the queue is drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Take the next queued notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapi_core::EvseState;

    fn st(code: u8) -> Notification {
        Notification::new(EvseState::from_code(code))
    }

    #[test]
    fn every_observer_receives_each_notification_once() {
        let sink = NotificationSink::new();
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        assert_eq!(sink.publish(st(3)), 2);
        assert_eq!(a.try_recv(), Some(st(3)));
        assert_eq!(a.try_recv(), None);
        assert_eq!(b.try_recv(), Some(st(3)));
        assert_eq!(b.try_recv(), None);
    }

    #[test]
    fn order_is_preserved() {
        let sink = NotificationSink::new();
        let mut sub = sink.subscribe();
        for code in [1, 2, 3, 254] {
            sink.publish(st(code));
        }
        let seen: Vec<u8> = std::iter::from_fn(|| sub.try_recv())
            .map(|n| n.state.code())
            .collect();
        assert_eq!(seen, [1, 2, 3, 254]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let sink = NotificationSink::new();
        let mut sub = sink.subscribe();
        assert!(sink.unsubscribe(sub.id()));
        assert!(!sink.unsubscribe(sub.id()));
        assert_eq!(sink.publish(st(2)), 0);
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let sink = NotificationSink::new();
        let sub = sink.subscribe();
        let _keep = sink.subscribe();
        drop(sub);
        assert_eq!(sink.publish(st(1)), 1);
        assert_eq!(sink.subscriber_count(), 1);
    }

    #[test]
    fn publish_with_no_observers_is_harmless() {
        let sink = NotificationSink::new();
        assert_eq!(sink.publish(st(3)), 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions_after_drain() {
        let sink = NotificationSink::new();
        let mut sub = sink.subscribe();
        sink.publish(st(3));
        sink.close();
        assert_eq!(sub.recv().await, Some(st(3)));
        assert_eq!(sub.recv().await, None);

        let mut late = sink.subscribe();
        assert_eq!(late.recv().await, None);
    }
}
