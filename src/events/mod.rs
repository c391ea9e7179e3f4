//! Event system for call notifications
//!
//! This module provides an event bus the call controller publishes to, for
//! presentation layers that prefer discrete events over watching state.

pub mod types;

pub use types::CallEvent;

use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting call events
///
/// # Example
///
/// ```no_run
/// use callcore::events::{CallEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(CallEvent::Error {
///     message: "Camera unavailable".to_string(),
/// });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("Received event: {:?}", event);
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<CallEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Dropped when nobody is subscribed.
    pub fn publish(&self, event: CallEvent) {
        let name = event.event_name();
        match self.tx.send(event) {
            Ok(receivers) => trace!("Published {} to {} subscriber(s)", name, receivers),
            Err(_) => trace!("No subscribers for {}", name),
        }
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls too far behind receives `Lagged` and misses
    /// some events.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

}

/// Wait for the next event matching `topic` (`*`, `call.*` or an exact name)
///
/// Lagged receivers skip ahead; returns `None` once the bus is dropped.
pub async fn recv_matching(
    rx: &mut broadcast::Receiver<CallEvent>,
    topic: &str,
) -> Option<CallEvent> {
    loop {
        match rx.recv().await {
            Ok(event) if event.matches_topic(topic) => return Some(event),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event subscriber lagged, {} event(s) skipped", n);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallId, CallStatus};

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CallEvent::StateChanged {
            call_id: Some(CallId::from(3)),
            status: CallStatus::Active,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CallEvent::StateChanged { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(CallEvent::Error {
            message: "test message".to_string(),
        });

        assert!(matches!(rx1.recv().await.unwrap(), CallEvent::Error { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), CallEvent::Error { .. }));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();

        // Should not panic when publishing with no subscribers
        bus.publish(CallEvent::Error {
            message: "test".to_string(),
        });
    }

    #[tokio::test]
    async fn test_recv_matching_skips_other_topics() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CallEvent::Error {
            message: "ignored".to_string(),
        });
        bus.publish(CallEvent::Connected {
            call_id: Some(CallId::from(5)),
        });

        let event = recv_matching(&mut rx, "call.connected").await.unwrap();
        assert!(matches!(event, CallEvent::Connected { .. }));

        drop(bus);
        assert!(recv_matching(&mut rx, "*").await.is_none());
    }
}
