//! Operator-facing events emitted by the aggregate link.
//!
//! Events complement `tracing` logs: logs are for developers, events are the
//! informational and warning reports an operator console subscribes to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single reported event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEvent {
    pub severity: Severity,
    /// Name of the reporting link
    pub source: String,
    pub message: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

impl LinkEvent {
    /// Create an event stamped with the current time.
    pub fn new(severity: Severity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            source: source.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.source, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = LinkEvent::new(Severity::Warning, "devices", "Invalid metadata JSON");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["source"], "devices");
        assert!(event.is_warning());
    }

    #[test]
    fn test_event_display() {
        let event = LinkEvent::new(Severity::Info, "devices", "Discovered new device");
        assert_eq!(event.to_string(), "[info] devices: Discovered new device");
    }
}
