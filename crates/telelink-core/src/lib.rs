//! Shared types for telelink.
//!
//! This crate holds what every other telelink crate agrees on:
//! - [`Error`] and [`Result`], the error taxonomy of the aggregate link
//! - [`LinkStatus`], the connection status of links and device handlers
//! - [`EventBus`] / [`EventProducer`], operator-facing info and warning events
//! - [`LinkConfig`], configuration loaded from TOML
//! - [`TmPacket`] and the converter/preprocessor/sink collaborator traits

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod packet;
pub mod status;

pub use config::{LinkConfig, MqttConfig, PreprocessorConfig, Qos};
pub use error::{Error, Result};
pub use event::{LinkEvent, Severity};
pub use eventbus::{EventBus, EventBusReceiver, EventProducer};
pub use packet::{ChannelSink, PacketPreprocessor, PacketSink, TelemetryConverter, TmPacket};
pub use status::LinkStatus;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
