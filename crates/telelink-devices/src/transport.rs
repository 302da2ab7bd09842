//! Transport abstraction between the broker session and the router.

use std::sync::Arc;

use async_trait::async_trait;
use telelink_core::Result;

/// Receives what the transport delivers.
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    /// One PUBLISH from the broker.
    async fn on_message(&self, topic: &str, payload: &[u8]);

    /// The broker session ended unexpectedly. No further messages follow.
    async fn on_connection_lost(&self, cause: &str);
}

/// A broker session feeding a [`MessageDelivery`].
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect, subscribe to the root topic, and start delivering messages.
    ///
    /// Fails with `Connection` or `Timeout` errors; the link cannot start
    /// without a transport.
    async fn start(&self, delivery: Arc<dyn MessageDelivery>) -> Result<()>;

    /// Unsubscribe and disconnect. Always completes; problems are logged.
    async fn stop(&self);

    /// Whether the session is established and has not been lost or stopped.
    fn is_connected(&self) -> bool;
}
