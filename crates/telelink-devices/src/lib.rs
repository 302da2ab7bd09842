//! Dynamic device discovery and telemetry routing.
//!
//! Devices announce themselves with retained JSON metadata on
//! `<device id>/metadata` and stream binary telemetry on
//! `<device id>/telemetry`. The [`DataLink`] subscribes to the whole topic
//! tree, creates one [`TelemetryHandler`] per announced device through the
//! [`DeviceFactory`], forwards telemetry to it, and tears it down again when
//! the device clears its metadata.
//!
//! ## Modules
//!
//! - [`metadata`]: metadata validation
//! - [`factory`]: device type tag → handler constructor
//! - [`handler`], [`radio`]: the handler trait and the radio handler
//! - [`preprocess`]: default converter and packet preprocessor
//! - [`registry`]: the concurrent device registry
//! - [`router`]: topic parsing and dispatch
//! - [`transport`], [`mqtt`]: broker session
//! - [`link`]: the aggregate link

pub mod factory;
pub mod handler;
pub mod link;
pub mod link_manager;
pub mod metadata;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod preprocess;
pub mod radio;
pub mod registry;
pub mod router;
pub mod transport;

pub use factory::{device_type_of, DeviceFactory, HandlerConstructor};
pub use handler::{HandlerContext, HandlerCore, HandlerStats, TelemetryHandler};
pub use link::{DataLink, DataLinkBuilder};
pub use link_manager::{LinkManager, LoggingLinkManager, NoopLinkManager};
pub use metadata::DeviceMetadata;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttConnector;
pub use preprocess::{GenericPreprocessor, PassthroughConverter};
pub use radio::RadioHandler;
pub use registry::{DeviceRegistry, Removal};
pub use router::{parse_topic, MessageRouter, SubTopic};
pub use transport::{MessageDelivery, TransportConnector};
