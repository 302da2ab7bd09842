//! Unified error handling for telelink.
//!
//! Every fault the aggregate link can observe maps to one variant here. Only
//! [`Error::Connection`] and [`Error::Timeout`] raised while starting the link
//! are fatal; everything else is contained to the message or device that
//! triggered it and reported as a warning.

/// Unified error type for telelink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Broker connect/subscribe failure or lost session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A bounded wait expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or incomplete metadata.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No handler constructor is registered for the device type.
    #[error("Unsupported device type: {0}")]
    UnsupportedDeviceType(String),

    /// The device identifier does not carry a `<type>-` prefix.
    #[error("Malformed device id: {0}")]
    MalformedDeviceId(String),

    /// A single message could not be routed.
    #[error("Routing error: {0}")]
    Routing(String),

    /// Failure while starting, stopping or unregistering a handler.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error must abort link startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! connection_err {
    ($msg:expr) => {
        $crate::error::Error::Connection($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Connection(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_err {
    ($msg:expr) => {
        $crate::error::Error::Validation($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Validation(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! lifecycle_err {
    ($msg:expr) => {
        $crate::error::Error::Lifecycle($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Lifecycle(format!($fmt, $($arg)*))
    };
}
