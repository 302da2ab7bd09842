//! Link connection status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Connection status of the aggregate link or of a single device handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkStatus {
    /// Connected and operational
    Ok,
    /// Not connected (yet, or any more)
    #[default]
    #[serde(alias = "UNAVAIL")]
    Unavailable,
    /// Failed to start or broken beyond recovery
    Failed,
    /// Explicitly disabled or stopped
    Disabled,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Failed => write!(f, "FAILED"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

impl FromStr for LinkStatus {
    type Err = Error;

    /// Parse the status strings devices publish in their metadata.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OK" => Ok(Self::Ok),
            "UNAVAIL" | "UNAVAILABLE" => Ok(Self::Unavailable),
            "FAILED" => Ok(Self::Failed),
            "DISABLED" => Ok(Self::Disabled),
            other => Err(Error::Validation(format!("Unknown status type: {}", other))),
        }
    }
}
