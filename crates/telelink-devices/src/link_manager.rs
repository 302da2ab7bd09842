//! The link manager collaborator.
//!
//! Every handler the aggregate link creates is handed to the link manager so
//! the rest of the system can see it as a sub-link, and withdrawn again when
//! the device goes away.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use telelink_core::{LinkConfig, Result};
use tracing::info;

use crate::handler::TelemetryHandler;

/// Registers and withdraws device sub-links.
#[async_trait]
pub trait LinkManager: Send + Sync {
    /// Make a freshly started handler known as a sub-link.
    async fn configure(&self, handler: Arc<dyn TelemetryHandler>, config: &LinkConfig)
        -> Result<()>;

    /// Withdraw the sub-link called `name`.
    async fn disable(&self, name: &str) -> Result<()>;
}

/// Link manager that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLinkManager;

#[async_trait]
impl LinkManager for NoopLinkManager {
    async fn configure(
        &self,
        _handler: Arc<dyn TelemetryHandler>,
        _config: &LinkConfig,
    ) -> Result<()> {
        Ok(())
    }

    async fn disable(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Link manager that logs changes and keeps the set of configured sub-links.
#[derive(Default)]
pub struct LoggingLinkManager {
    sub_links: DashMap<String, Arc<dyn TelemetryHandler>>,
}

impl LoggingLinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the configured sub-links, sorted.
    pub fn sub_link_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sub_links.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TelemetryHandler>> {
        self.sub_links.get(name).map(|e| e.value().clone())
    }
}

#[async_trait]
impl LinkManager for LoggingLinkManager {
    async fn configure(
        &self,
        handler: Arc<dyn TelemetryHandler>,
        config: &LinkConfig,
    ) -> Result<()> {
        info!(
            "Configured sub-link {} ({}) of {}",
            handler.name(),
            handler.device_type(),
            config.name
        );
        self.sub_links.insert(handler.name().to_string(), handler);
        Ok(())
    }

    async fn disable(&self, name: &str) -> Result<()> {
        if self.sub_links.remove(name).is_some() {
            info!("Disabled sub-link {}", name);
        }
        Ok(())
    }
}
