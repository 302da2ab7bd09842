//! Event bus for link events.
//!
//! The bus is a broadcast channel: every subscriber sees every event published
//! after it subscribed, slow subscribers lose the oldest events.

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::event::{LinkEvent, Severity};

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast bus carrying [`LinkEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event.
    ///
    /// Returns `true` if there was at least one subscriber.
    pub fn publish(&self, event: LinkEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<LinkEvent>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // Missed some events, keep receiving
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<LinkEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Reports events on behalf of one link.
///
/// Every report is logged through `tracing` and published on the bus.
#[derive(Clone)]
pub struct EventProducer {
    source: String,
    bus: EventBus,
}

impl EventProducer {
    pub fn new(source: impl Into<String>, bus: EventBus) -> Self {
        Self {
            source: source.into(),
            bus,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn send_info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(link = %self.source, "{}", message);
        self.bus
            .publish(LinkEvent::new(Severity::Info, self.source.clone(), message));
    }

    pub fn send_warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(link = %self.source, "{}", message);
        self.bus
            .publish(LinkEvent::new(Severity::Warning, self.source.clone(), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.publish(LinkEvent::new(Severity::Info, "x", "y")));
    }

    #[tokio::test]
    async fn test_producer_publishes() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let producer = EventProducer::new("devices", bus.clone());

        producer.send_info("Discovered new device: radio-a");
        producer.send_warning("Invalid metadata JSON from radio-b");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.severity, Severity::Info);
        assert_eq!(first.source, "devices");

        let second = rx.recv().await.unwrap();
        assert!(second.is_warning());
        assert!(second.message.contains("radio-b"));
    }

    #[test]
    fn test_drain() {
        let bus = EventBus::with_capacity(8);
        let mut rx = bus.subscribe();
        let producer = EventProducer::new("devices", bus);
        for i in 0..3 {
            producer.send_info(format!("event {}", i));
        }
        let events = rx.drain();
        assert_eq!(events.len(), 3);
        assert!(rx.try_recv().is_none());
    }
}
