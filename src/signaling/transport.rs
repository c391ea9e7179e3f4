//! Signaling transport abstraction
//!
//! A transport delivers typed [`SignalingEvent`]s to any number of
//! subscriptions and accepts outbound [`SignalingMessage`]s. Each
//! subscription is cancellable on its own, so a consumer that has torn
//! down stops receiving events immediately.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::messages::{SignalingEvent, SignalingMessage};
use crate::error::Result;

/// Persistent bidirectional signaling channel
pub trait SignalingTransport: Send + Sync {
    /// Queue a message for delivery (fire-and-forget)
    fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Open a new subscription to inbound events
    fn subscribe(&self) -> Subscription;
}

/// Receiving end of a transport subscription
///
/// Dropping the subscription cancels it.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SignalingEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Receive the next event
    ///
    /// Returns `None` once the subscription is cancelled or the transport
    /// has gone away.
    pub async fn recv(&mut self) -> Option<SignalingEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<SignalingEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop receiving events
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Token that cancels this subscription when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fan-out registry shared by transport implementations
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: Mutex<Vec<(mpsc::UnboundedSender<SignalingEvent>, CancellationToken)>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.subscribers.lock().push((tx, cancel.clone()));
        Subscription { rx, cancel }
    }

    /// Deliver an event to every live subscription
    ///
    /// Cancelled or dropped subscriptions are pruned. Returns the number of
    /// subscriptions the event reached.
    pub fn publish(&self, event: &SignalingEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(tx, cancel)| !cancel.is_cancelled() && !tx.is_closed());

        let mut delivered = 0;
        for (tx, _) in subscribers.iter() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!("Signaling event {} delivered to {} subscribers", event.name(), delivered);
        delivered
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(tx, cancel)| !cancel.is_cancelled() && !tx.is_closed());
        subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every subscription
    pub fn close_all(&self) {
        for (_, cancel) in self.subscribers.lock().drain(..) {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallId;
    use crate::signaling::messages::Registration;

    fn registered(id: u64) -> SignalingEvent {
        SignalingEvent::CallRegistered(Registration {
            call_id: CallId::from(id),
            request_id: None,
        })
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let set = SubscriberSet::new();
        let mut sub = set.subscribe();

        assert_eq!(set.publish(&registered(1)), 1);
        assert_eq!(sub.recv().await, Some(registered(1)));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let set = SubscriberSet::new();
        let mut first = set.subscribe();
        let mut second = set.subscribe();
        assert_eq!(set.len(), 2);

        first.unsubscribe();
        assert_eq!(set.publish(&registered(2)), 1);

        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await, Some(registered(2)));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_events_dropped_after_cancel() {
        let set = SubscriberSet::new();
        let mut sub = set.subscribe();

        set.publish(&registered(3));
        sub.unsubscribe();

        assert!(!sub.is_active());
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let set = SubscriberSet::new();
        let sub = set.subscribe();
        drop(sub);

        assert!(set.is_empty());
        assert_eq!(set.publish(&registered(4)), 0);
    }
}
