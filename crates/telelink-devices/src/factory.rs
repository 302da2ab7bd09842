//! Device factory: maps device type tags to handler constructors.
//!
//! The device type is the prefix of the device identifier before the first
//! `-` (`radio-pad-a` → `radio`). New device types are added by registering a
//! constructor for their tag.
//!
//! ```
//! use std::sync::Arc;
//! use telelink_devices::factory::{device_type_of, DeviceFactory};
//! use telelink_devices::radio::RadioHandler;
//!
//! let factory = DeviceFactory::new();
//! factory.register("beacon", |ctx| Ok(Arc::new(RadioHandler::new(ctx))));
//!
//! assert_eq!(device_type_of("beacon-7").unwrap(), "beacon");
//! assert_eq!(factory.supported_types(), vec!["beacon", "radio"]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use telelink_core::{Error, Result};

use crate::handler::{HandlerContext, TelemetryHandler};
use crate::radio::{RadioHandler, RADIO_DEVICE_TYPE};

/// Builds a handler for one device.
pub type HandlerConstructor =
    Arc<dyn Fn(HandlerContext) -> Result<Arc<dyn TelemetryHandler>> + Send + Sync>;

/// Derive the device type from a device identifier.
pub fn device_type_of(device_id: &str) -> Result<&str> {
    match device_id.split_once('-') {
        Some((device_type, _)) if !device_type.is_empty() => Ok(device_type),
        _ => Err(Error::MalformedDeviceId(format!(
            "\"{}\": could not identify device type",
            device_id
        ))),
    }
}

/// Registration table of handler constructors.
pub struct DeviceFactory {
    constructors: RwLock<HashMap<String, HandlerConstructor>>,
}

impl DeviceFactory {
    /// Create a factory with the built-in device types registered.
    pub fn new() -> Self {
        let factory = Self::empty();
        factory.register(RADIO_DEVICE_TYPE, |ctx| Ok(Arc::new(RadioHandler::new(ctx))));
        factory
    }

    /// Create a factory without any device types.
    pub fn empty() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the constructor for a device type.
    pub fn register<F>(&self, device_type: impl Into<String>, constructor: F)
    where
        F: Fn(HandlerContext) -> Result<Arc<dyn TelemetryHandler>> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(device_type.into(), Arc::new(constructor));
    }

    /// Remove a device type. Returns `true` if it was registered.
    pub fn unregister(&self, device_type: &str) -> bool {
        self.constructors.write().remove(device_type).is_some()
    }

    pub fn supports(&self, device_type: &str) -> bool {
        self.constructors.read().contains_key(device_type)
    }

    /// Registered device types, sorted.
    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Construct a handler for `ctx.device_type`.
    ///
    /// Unknown types fail with [`Error::UnsupportedDeviceType`]; nothing is
    /// remembered about the failure.
    pub fn create(&self, ctx: HandlerContext) -> Result<Arc<dyn TelemetryHandler>> {
        // The table lock is released before the constructor runs
        let constructor = self.constructors.read().get(&ctx.device_type).cloned();
        match constructor {
            Some(constructor) => constructor(ctx),
            None => Err(Error::UnsupportedDeviceType(format!(
                "{} (device {})",
                ctx.device_type, ctx.device_id
            ))),
        }
    }
}

impl Default for DeviceFactory {
    fn default() -> Self {
        Self::new()
    }
}
