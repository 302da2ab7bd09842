//! Radio device handler (type tag `radio`).

use std::sync::Arc;

use telelink_core::TelemetryConverter;
use tracing::trace;

use crate::handler::{HandlerContext, HandlerCore, TelemetryHandler};
use crate::preprocess::PassthroughConverter;

/// Device type tag handled by [`RadioHandler`].
pub const RADIO_DEVICE_TYPE: &str = "radio";

/// Sub-link of a radio: each telemetry payload carries downlinked frames.
pub struct RadioHandler {
    core: HandlerCore,
    converter: Arc<dyn TelemetryConverter>,
}

impl RadioHandler {
    /// Create a radio handler using the passthrough converter.
    pub fn new(ctx: HandlerContext) -> Self {
        Self::with_converter(ctx, Arc::new(PassthroughConverter))
    }

    pub fn with_converter(ctx: HandlerContext, converter: Arc<dyn TelemetryConverter>) -> Self {
        Self {
            core: HandlerCore::new(ctx),
            converter,
        }
    }
}

impl TelemetryHandler for RadioHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn handle(&self, payload: &[u8]) {
        if !self.core.is_running() {
            trace!("{} is stopped, ignoring {} bytes", self.name(), payload.len());
            return;
        }
        self.core.data_in(payload.len());
        let packets = self.converter.convert(payload, self.name());
        self.core.forward(packets);
    }
}
