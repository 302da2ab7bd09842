//! Message router.
//!
//! Every broker message is addressed `<device id>/<sub-topic>`:
//!
//! | Sub-topic   | Payload   | Effect                                        |
//! |-------------|-----------|-----------------------------------------------|
//! | `metadata`  | empty     | device is gone, its handler is torn down      |
//! | `metadata`  | JSON      | device is registered (once) and its status set |
//! | `telemetry` | any       | forwarded to the device's handler, if any     |
//!
//! Sub-topics are matched case-insensitively; anything else is ignored.
//! Errors and panics raised while handling one message are reported as
//! warnings and never reach the transport.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use telelink_core::{
    Error, EventProducer, LinkConfig, PacketPreprocessor, PacketSink, Result,
};
use tracing::{debug, trace};

use crate::factory::{device_type_of, DeviceFactory};
use crate::handler::{HandlerContext, TelemetryHandler};
use crate::link_manager::LinkManager;
use crate::metadata::DeviceMetadata;
use crate::preprocess::GenericPreprocessor;
use crate::registry::DeviceRegistry;
use crate::transport::MessageDelivery;

/// Sub-topics the router acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTopic {
    Metadata,
    Telemetry,
}

/// Split a topic into device identifier and sub-topic.
///
/// Returns `None` for topics with fewer than two segments and for unknown
/// sub-topics. Segments after the second are ignored.
pub fn parse_topic(topic: &str) -> Option<(&str, SubTopic)> {
    let mut segments = topic.split('/');
    let device_id = segments.next()?;
    let sub_topic = segments.next()?;

    if sub_topic.eq_ignore_ascii_case("metadata") {
        Some((device_id, SubTopic::Metadata))
    } else if sub_topic.eq_ignore_ascii_case("telemetry") {
        Some((device_id, SubTopic::Telemetry))
    } else {
        None
    }
}

/// Dispatches broker messages to the device registry and handlers.
pub struct MessageRouter {
    config: Arc<LinkConfig>,
    registry: Arc<DeviceRegistry>,
    factory: Arc<DeviceFactory>,
    link_manager: Arc<dyn LinkManager>,
    preprocessor: Arc<dyn PacketPreprocessor>,
    sink: Arc<dyn PacketSink>,
    events: EventProducer,
}

impl MessageRouter {
    /// Create a router with an empty registry.
    ///
    /// Handlers get a [`GenericPreprocessor`] built from
    /// `config.preprocessor`.
    pub fn new(
        config: LinkConfig,
        factory: Arc<DeviceFactory>,
        link_manager: Arc<dyn LinkManager>,
        sink: Arc<dyn PacketSink>,
        events: EventProducer,
    ) -> Self {
        let registry = Arc::new(
            DeviceRegistry::new(link_manager.clone(), events.clone()).with_teardown_timeout(
                Duration::from_secs(config.mqtt.disconnect_timeout_secs),
            ),
        );
        Self {
            preprocessor: Arc::new(GenericPreprocessor::new(config.preprocessor)),
            config: Arc::new(config),
            registry,
            factory,
            link_manager,
            sink,
            events,
        }
    }

    /// Use a custom preprocessor for handlers created from now on.
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn PacketPreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn factory(&self) -> &Arc<DeviceFactory> {
        &self.factory
    }

    pub fn events(&self) -> &EventProducer {
        &self.events
    }

    /// Handle one broker message.
    pub async fn route(&self, topic: &str, payload: &[u8]) {
        let outcome = AssertUnwindSafe(self.dispatch(topic, payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::Routing(format!(
                    "panic while handling message: {}",
                    panic_message(panic.as_ref())
                )))
            });

        if let Err(e) = outcome {
            self.events
                .send_warning(format!("Dropped message on {}: {}", topic, e));
        }
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let Some((device_id, sub_topic)) = parse_topic(topic) else {
            trace!("Ignoring message on {}", topic);
            return Ok(());
        };

        match sub_topic {
            SubTopic::Metadata if payload.is_empty() => {
                if self.registry.remove(device_id).is_none() {
                    debug!("Device {} cleared its metadata but was not registered", device_id);
                }
                Ok(())
            }
            SubTopic::Metadata => self.handle_metadata(device_id, payload).await,
            SubTopic::Telemetry => {
                match self.registry.lookup(device_id) {
                    Some(handler) => handler.handle(payload),
                    None => trace!(
                        "Dropping {} bytes of telemetry from unregistered device {}",
                        payload.len(),
                        device_id
                    ),
                }
                Ok(())
            }
        }
    }

    async fn handle_metadata(&self, device_id: &str, payload: &[u8]) -> Result<()> {
        let metadata = DeviceMetadata::parse(payload)?;
        let device_type = device_type_of(device_id)?;

        let (handler, created) = self
            .registry
            .register_if_absent(device_id, || self.create_handler(device_id, device_type))
            .await?;
        if created {
            self.events
                .send_info(format!("Discovered new device: {}", device_id));
        }

        self.apply_status(handler.as_ref(), &metadata);
        Ok(())
    }

    async fn create_handler(
        &self,
        device_id: &str,
        device_type: &str,
    ) -> Result<Arc<dyn TelemetryHandler>> {
        let handler = self.factory.create(HandlerContext {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            link_name: self.config.name.clone(),
            preprocessor: self.preprocessor.clone(),
            sink: self.sink.clone(),
        })?;

        handler.start().await?;
        if let Err(e) = self.link_manager.configure(handler.clone(), &self.config).await {
            if let Err(stop_err) = handler.stop().await {
                debug!("Failed to stop unconfigured {}: {}", handler.name(), stop_err);
            }
            return Err(e);
        }
        Ok(handler)
    }

    fn apply_status(&self, handler: &dyn TelemetryHandler, metadata: &DeviceMetadata) {
        match metadata.status() {
            Some(Ok(status)) => handler.set_status(status),
            Some(Err(e)) => self
                .events
                .send_warning(format!("Device {} reported {}", handler.device_id(), e)),
            None => {}
        }
        if let Some(long_status) = metadata.long_status() {
            handler.set_detailed_status(long_status);
        }
    }
}

#[async_trait]
impl MessageDelivery for MessageRouter {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        self.route(topic, payload).await;
    }

    async fn on_connection_lost(&self, cause: &str) {
        self.events
            .send_warning(format!("MQTT connection lost: {}", cause));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerCore;
    use crate::link_manager::{LoggingLinkManager, NoopLinkManager};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use telelink_core::{lifecycle_err, ChannelSink, EventBus, LinkStatus, MqttConfig, Severity};

    const METADATA: &[u8] = br#"{"frequency":435,"status":"OK","long_status":"nominal"}"#;

    fn router() -> (MessageRouter, EventBus) {
        let bus = EventBus::new();
        let (sink, _rx) = ChannelSink::new();
        let router = MessageRouter::new(
            LinkConfig::new("devices", MqttConfig::new("localhost")),
            Arc::new(DeviceFactory::new()),
            Arc::new(NoopLinkManager),
            Arc::new(sink),
            EventProducer::new("devices", bus.clone()),
        );
        (router, bus)
    }

    /// Link manager that rejects the first sub-link it is given.
    struct FlakyLinkManager {
        inner: LoggingLinkManager,
        reject_next: AtomicBool,
        rejected: Mutex<Option<Arc<dyn TelemetryHandler>>>,
    }

    #[async_trait]
    impl LinkManager for FlakyLinkManager {
        async fn configure(
            &self,
            handler: Arc<dyn TelemetryHandler>,
            config: &LinkConfig,
        ) -> Result<()> {
            if self.reject_next.swap(false, Ordering::SeqCst) {
                *self.rejected.lock() = Some(handler);
                return Err(lifecycle_err!("sub-link table full"));
            }
            self.inner.configure(handler, config).await
        }

        async fn disable(&self, name: &str) -> Result<()> {
            self.inner.disable(name).await
        }
    }

    struct FaultyHandler {
        core: HandlerCore,
    }

    impl TelemetryHandler for FaultyHandler {
        fn core(&self) -> &HandlerCore {
            &self.core
        }

        fn handle(&self, _payload: &[u8]) {
            panic!("decoder exploded");
        }
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(
            parse_topic("radio-a/metadata"),
            Some(("radio-a", SubTopic::Metadata))
        );
        assert_eq!(
            parse_topic("radio-a/TELEMETRY"),
            Some(("radio-a", SubTopic::Telemetry))
        );
        assert_eq!(
            parse_topic("radio-a/Metadata/extra"),
            Some(("radio-a", SubTopic::Metadata))
        );
        assert_eq!(parse_topic("radio-a"), None);
        assert_eq!(parse_topic(""), None);
        assert_eq!(parse_topic("radio-a/commands"), None);
        assert_eq!(parse_topic("radio-a/"), None);
    }

    #[tokio::test]
    async fn test_metadata_applies_status() {
        let (router, _bus) = router();

        router.route("radio-a/metadata", METADATA).await;
        let handler = router.registry().lookup("radio-a").unwrap();
        assert_eq!(handler.status(), LinkStatus::Ok);
        assert_eq!(handler.detailed_status(), "nominal");

        // Retained re-announcement refreshes status without re-creating
        router
            .route(
                "radio-a/metadata",
                br#"{"frequency":435,"status":"FAILED","long_status":"antenna fault"}"#,
            )
            .await;
        let same = router.registry().lookup("radio-a").unwrap();
        assert!(Arc::ptr_eq(&handler, &same));
        assert_eq!(same.status(), LinkStatus::Failed);
        assert_eq!(same.detailed_status(), "antenna fault");
    }

    #[tokio::test]
    async fn test_unknown_status_is_reported() {
        let (router, bus) = router();
        router.route("radio-a/metadata", METADATA).await;
        let mut events = bus.subscribe();

        router
            .route(
                "radio-a/metadata",
                br#"{"frequency":435,"status":"SMOKING","long_status":"hot"}"#,
            )
            .await;

        let handler = router.registry().lookup("radio-a").unwrap();
        assert_eq!(handler.status(), LinkStatus::Ok);
        assert_eq!(handler.detailed_status(), "hot");
        let event = events.try_recv().unwrap();
        assert_eq!(event.severity, Severity::Warning);
        assert!(event.message.contains("SMOKING"));
    }

    #[tokio::test]
    async fn test_malformed_device_id() {
        let (router, bus) = router();
        let mut events = bus.subscribe();

        router.route("radio/metadata", METADATA).await;

        assert!(router.registry().is_empty());
        let event = events.try_recv().unwrap();
        assert!(event.is_warning());
        assert!(event.message.contains("Malformed device id"));
    }

    #[tokio::test]
    async fn test_constructor_panic_is_contained() {
        let (router, bus) = router();
        router
            .factory()
            .register("bomb", |_ctx| panic!("constructor exploded"));
        let mut events = bus.subscribe();

        router.route("bomb-1/metadata", METADATA).await;

        assert!(router.registry().lookup("bomb-1").is_none());
        let event = events.try_recv().unwrap();
        assert!(event.is_warning());
        assert!(event.message.contains("constructor exploded"));

        // The router keeps working
        router.route("radio-a/metadata", METADATA).await;
        assert!(router.registry().contains("radio-a"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let (router, bus) = router();
        router.factory().register("faulty", |ctx| {
            Ok(Arc::new(FaultyHandler {
                core: HandlerCore::new(ctx),
            }))
        });
        router.route("faulty-1/metadata", METADATA).await;
        let mut events = bus.subscribe();

        router.route("faulty-1/telemetry", &[0x01]).await;

        let event = events.try_recv().unwrap();
        assert!(event.is_warning());
        assert!(event.message.contains("faulty-1/telemetry"));
        assert!(event.message.contains("Routing error"));
        assert!(event.message.contains("decoder exploded"));
        assert!(router.registry().contains("faulty-1"));
    }

    #[tokio::test]
    async fn test_connection_lost_warning() {
        let (router, bus) = router();
        let mut events = bus.subscribe();

        router.on_connection_lost("broker went away").await;

        let event = events.try_recv().unwrap();
        assert!(event.is_warning());
        assert_eq!(event.message, "MQTT connection lost: broker went away");
    }

    #[tokio::test]
    async fn test_configure_failure_is_retried() {
        let bus = EventBus::new();
        let (sink, _rx) = ChannelSink::new();
        let manager = Arc::new(FlakyLinkManager {
            inner: LoggingLinkManager::new(),
            reject_next: AtomicBool::new(true),
            rejected: Mutex::new(None),
        });
        let router = MessageRouter::new(
            LinkConfig::new("devices", MqttConfig::new("localhost")),
            Arc::new(DeviceFactory::new()),
            manager.clone(),
            Arc::new(sink),
            EventProducer::new("devices", bus.clone()),
        );
        let mut events = bus.subscribe();

        router.route("radio-a/metadata", METADATA).await;

        assert!(router.registry().lookup("radio-a").is_none());
        assert!(manager.inner.sub_link_names().is_empty());
        let rejected = manager.rejected.lock().clone().unwrap();
        assert_eq!(rejected.status(), LinkStatus::Disabled);
        let event = events.try_recv().unwrap();
        assert!(event.is_warning());
        assert!(event.message.contains("sub-link table full"));
        assert!(events.try_recv().is_none());

        // The next announcement registers the device
        router.route("radio-a/metadata", METADATA).await;
        let handler = router.registry().lookup("radio-a").unwrap();
        assert!(!Arc::ptr_eq(&handler, &rejected));
        assert_eq!(handler.status(), LinkStatus::Ok);
        assert_eq!(manager.inner.sub_link_names(), vec!["devices/radio-a"]);
        let event = events.try_recv().unwrap();
        assert_eq!(event.message, "Discovered new device: radio-a");
    }
}
