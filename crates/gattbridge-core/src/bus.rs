//! Action bus
//!
//! Every hardware callback for one manager instance is published onto a
//! single [`ActionBus`] as a tagged event. Correlated operations subscribe to
//! the bus and pick out the events that belong to them.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::sync::lock;

/// Receiving end of a bus subscription
pub type EventReceiver<E> = mpsc::UnboundedReceiver<E>;

// ----------------------------------------------------------------------------
// Action Bus
// ----------------------------------------------------------------------------

/// Multicast channel fanning hardware callbacks out to subscribers.
///
/// Each subscriber gets its own unbounded queue so a slow subscriber never
/// loses events. Subscribers see only events published after they subscribed.
pub struct ActionBus<E> {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E> Clone for ActionBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E> Default for ActionBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E> fmt::Debug for ActionBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<E> ActionBus<E> {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> EventReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Number of subscribers that have not been dropped yet
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl<E: Clone + fmt::Debug> ActionBus<E> {
    /// Deliver an event to every live subscriber in subscription order.
    ///
    /// Closed subscribers are pruned as a side effect.
    pub fn publish(&self, event: E) {
        let mut subscribers = lock(&self.subscribers);
        trace!(subscribers = subscribers.len(), ?event, "Publishing event");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_publish_order() {
        let bus = ActionBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(1u32);
        bus.publish(2u32);

        assert_eq!(first.recv().await, Some(1));
        assert_eq!(first.recv().await, Some(2));
        assert_eq!(second.recv().await, Some(1));
        assert_eq!(second.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_subscribers() {
        let bus = ActionBus::new();
        bus.publish("early");

        let mut rx = bus.subscribe();
        bus.publish("late");

        assert_eq!(rx.recv().await, Some("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = ActionBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.publish(0u8);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(lock(&bus.subscribers).len(), 1);
    }

    #[test]
    fn test_slow_subscriber_keeps_every_event() {
        let bus = ActionBus::new();
        let mut rx = bus.subscribe();
        for i in 0..10_000u32 {
            bus.publish(i);
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 10_000);
    }

    #[tokio::test]
    async fn test_receiver_ends_when_bus_dropped() {
        let bus: ActionBus<u8> = ActionBus::new();
        let mut rx = bus.subscribe();
        drop(bus);
        assert_eq!(rx.recv().await, None);
    }
}
