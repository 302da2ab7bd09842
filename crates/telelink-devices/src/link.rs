//! The aggregate data link.
//!
//! A [`DataLink`] owns one transport session and the router behind it. Every
//! discovered device becomes a sub-link of the aggregate link.
//!
//! ```no_run
//! # async fn run() -> telelink_core::Result<()> {
//! use std::sync::Arc;
//! use telelink_core::{ChannelSink, LinkConfig};
//! use telelink_devices::DataLink;
//!
//! let config = LinkConfig::load("telelink.toml")?;
//! let (sink, mut packets) = ChannelSink::new();
//! let link = DataLink::builder(config).sink(Arc::new(sink)).build()?;
//!
//! link.start().await?;
//! while let Some(packet) = packets.recv().await {
//!     println!("{} bytes from {}", packet.len(), packet.link);
//! }
//! link.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use telelink_core::{
    config_err, EventBus, EventBusReceiver, EventProducer, LinkConfig, LinkStatus,
    PacketPreprocessor, PacketSink, Result,
};
use tracing::warn;

use crate::factory::DeviceFactory;
use crate::handler::TelemetryHandler;
use crate::link_manager::{LinkManager, NoopLinkManager};
use crate::registry::{DeviceRegistry, Removal};
use crate::router::MessageRouter;
use crate::transport::{MessageDelivery, TransportConnector};

pub const STATUS_NOT_STARTED: &str = "Not started.";
pub const STATUS_CONNECTING: &str = "Connecting to MQTT broker";
pub const STATUS_CONNECTED: &str = "Connected to MQTT broker, listening for devices";
pub const STATUS_STOPPED: &str = "Stopped.";

struct LinkState {
    detailed_status: RwLock<String>,
    failed: AtomicBool,
}

impl LinkState {
    fn set_detailed_status(&self, status: impl Into<String>) {
        *self.detailed_status.write() = status.into();
    }
}

/// Feeds the router and records connection loss on the link.
struct LinkDelivery {
    router: Arc<MessageRouter>,
    state: Arc<LinkState>,
}

#[async_trait]
impl MessageDelivery for LinkDelivery {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        self.router.route(topic, payload).await;
    }

    async fn on_connection_lost(&self, cause: &str) {
        self.state
            .set_detailed_status(format!("Connection lost: {}", cause));
        self.router.on_connection_lost(cause).await;
    }
}

/// Aggregate link over a broker session.
pub struct DataLink {
    router: Arc<MessageRouter>,
    transport: Arc<dyn TransportConnector>,
    state: Arc<LinkState>,
    events: EventProducer,
}

impl DataLink {
    pub fn builder(config: LinkConfig) -> DataLinkBuilder {
        DataLinkBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.router.config().name
    }

    pub fn config(&self) -> &LinkConfig {
        self.router.config()
    }

    /// Connect to the broker and start discovering devices.
    ///
    /// A failure leaves the link `FAILED` and is returned to the caller.
    pub async fn start(&self) -> Result<()> {
        self.state.failed.store(false, Ordering::Release);
        self.state.set_detailed_status(STATUS_CONNECTING);

        let delivery = Arc::new(LinkDelivery {
            router: self.router.clone(),
            state: self.state.clone(),
        });
        match self.transport.start(delivery).await {
            Ok(()) => {
                self.state.set_detailed_status(STATUS_CONNECTED);
                self.events.send_info(format!(
                    "Connected to MQTT broker {}",
                    self.config().mqtt.broker_addr()
                ));
                Ok(())
            }
            Err(e) => {
                self.state.failed.store(true, Ordering::Release);
                self.state
                    .set_detailed_status(format!("Failed to start: {}", e));
                self.events
                    .send_warning(format!("Failed to start link {}: {}", self.name(), e));
                Err(e)
            }
        }
    }

    /// Disconnect and tear down every device handler.
    pub async fn stop(&self) {
        self.transport.stop().await;

        let removals = self.router.registry().clear();
        let count = removals.len();
        let wait = Duration::from_secs(self.config().mqtt.disconnect_timeout_secs);
        let teardown = futures::future::join_all(removals.into_iter().map(Removal::wait));
        if tokio::time::timeout(wait, teardown).await.is_err() {
            warn!(
                "Teardown of {} device handlers did not finish within {}s",
                count,
                wait.as_secs()
            );
        }

        self.state.set_detailed_status(STATUS_STOPPED);
        self.events
            .send_info(format!("Stopped, {} devices removed", count));
    }

    /// `OK` while the transport is connected, `FAILED` after a failed start.
    pub fn connection_status(&self) -> LinkStatus {
        if self.transport.is_connected() {
            LinkStatus::Ok
        } else if self.state.failed.load(Ordering::Acquire) {
            LinkStatus::Failed
        } else {
            LinkStatus::Unavailable
        }
    }

    pub fn detailed_status(&self) -> String {
        self.state.detailed_status.read().clone()
    }

    /// Handlers of the currently registered devices.
    pub fn sub_links(&self) -> Vec<Arc<dyn TelemetryHandler>> {
        self.router.registry().handlers()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        self.router.registry()
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Receive the link's info and warning events from now on.
    pub fn subscribe_events(&self) -> EventBusReceiver {
        self.events.bus().subscribe()
    }
}

/// Assembles a [`DataLink`].
///
/// Only the packet sink is mandatory. Defaults: the built-in device factory,
/// [`NoopLinkManager`], a fresh [`EventBus`] and, with the `mqtt` feature, an
/// MQTT transport built from `config.mqtt`.
pub struct DataLinkBuilder {
    config: LinkConfig,
    transport: Option<Arc<dyn TransportConnector>>,
    factory: Option<Arc<DeviceFactory>>,
    link_manager: Option<Arc<dyn LinkManager>>,
    preprocessor: Option<Arc<dyn PacketPreprocessor>>,
    sink: Option<Arc<dyn PacketSink>>,
    event_bus: Option<EventBus>,
}

impl DataLinkBuilder {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            transport: None,
            factory: None,
            link_manager: None,
            preprocessor: None,
            sink: None,
            event_bus: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn TransportConnector>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn factory(mut self, factory: Arc<DeviceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn link_manager(mut self, link_manager: Arc<dyn LinkManager>) -> Self {
        self.link_manager = Some(link_manager);
        self
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn PacketPreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn PacketSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<DataLink> {
        self.config.validate()?;
        let sink = self
            .sink
            .ok_or_else(|| config_err!("a packet sink is required"))?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };

        let events = EventProducer::new(self.config.name.clone(), self.event_bus.unwrap_or_default());
        let mut router = MessageRouter::new(
            self.config,
            self.factory.unwrap_or_default(),
            self.link_manager
                .unwrap_or_else(|| Arc::new(NoopLinkManager)),
            sink,
            events.clone(),
        );
        if let Some(preprocessor) = self.preprocessor {
            router = router.with_preprocessor(preprocessor);
        }

        Ok(DataLink {
            router: Arc::new(router),
            transport,
            state: Arc::new(LinkState {
                detailed_status: RwLock::new(STATUS_NOT_STARTED.to_string()),
                failed: AtomicBool::new(false),
            }),
            events,
        })
    }
}

#[cfg(feature = "mqtt")]
fn default_transport(config: &LinkConfig) -> Result<Arc<dyn TransportConnector>> {
    Ok(Arc::new(crate::mqtt::MqttConnector::new(config.mqtt.clone())))
}

#[cfg(not(feature = "mqtt"))]
fn default_transport(_config: &LinkConfig) -> Result<Arc<dyn TransportConnector>> {
    Err(config_err!("no transport configured and the mqtt feature is disabled"))
}
