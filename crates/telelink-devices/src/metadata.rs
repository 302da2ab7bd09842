//! Device metadata validation.
//!
//! Devices announce themselves with a retained JSON object on
//! `<device id>/metadata`:
//!
//! ```json
//! {"frequency": 435, "status": "OK", "long_status": "nominal"}
//! ```
//!
//! Only the presence of the three keys is required. The expected value types
//! are: `frequency` a number, `status` one of the [`LinkStatus`] strings
//! (`OK`, `UNAVAIL`, `FAILED`, `DISABLED`), `long_status` free text. Values of
//! other types are tolerated and simply not applied to the handler.
//!
//! An empty payload is not metadata: it is the "device gone" sentinel and must
//! be handled by the caller before validation.

use serde_json::{Map, Value};
use telelink_core::{validation_err, LinkStatus, Result};

/// Keys every metadata object must carry.
pub const REQUIRED_KEYS: [&str; 3] = ["frequency", "status", "long_status"];

/// Returns `true` iff `payload` is a UTF-8 JSON object holding all
/// [`REQUIRED_KEYS`].
pub fn validate(payload: &[u8]) -> bool {
    DeviceMetadata::parse(payload).is_ok()
}

/// Typed view of a validated metadata object.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMetadata {
    fields: Map<String, Value>,
}

impl DeviceMetadata {
    /// Parse and validate a metadata payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| validation_err!("metadata is not UTF-8: {}", e))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| validation_err!("metadata is not JSON: {}", e))?;
        let Value::Object(fields) = value else {
            return Err(validation_err!("metadata is not a JSON object"));
        };

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !fields.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(validation_err!(
                "metadata is missing required keys: {}",
                missing.join(", ")
            ));
        }

        Ok(Self { fields })
    }

    /// Announced frequency, when it is a number.
    pub fn frequency(&self) -> Option<f64> {
        self.fields.get("frequency").and_then(Value::as_f64)
    }

    /// Raw `status` value, when it is a string.
    pub fn status_str(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }

    /// `status` parsed as a [`LinkStatus`].
    ///
    /// `None` when the value is not a string, `Some(Err(..))` when it is an
    /// unknown status string.
    pub fn status(&self) -> Option<Result<LinkStatus>> {
        self.status_str().map(str::parse)
    }

    /// Human-readable status, when it is a string.
    pub fn long_status(&self) -> Option<&str> {
        self.fields.get("long_status").and_then(Value::as_str)
    }

    /// Any other field the device published.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telelink_core::Error;

    #[test]
    fn test_valid_metadata() {
        assert!(validate(
            br#"{"frequency":435,"status":"OK","long_status":"nominal"}"#
        ));
        // Values are not type-checked
        assert!(validate(
            br#"{"frequency":null,"status":[],"long_status":{}}"#
        ));
        // Extra keys are fine
        assert!(validate(
            br#"{"frequency":1,"status":"OK","long_status":"x","rssi":-80}"#
        ));
    }

    #[test]
    fn test_invalid_metadata() {
        // Empty payload is not metadata
        assert!(!validate(b""));
        // Not UTF-8
        assert!(!validate(&[0xff, 0xfe, 0x7b]));
        // Not JSON
        assert!(!validate(b"frequency=435"));
        // Not an object
        assert!(!validate(b"[1,2,3]"));
        assert!(!validate(b"\"OK\""));
        assert!(!validate(b"42"));
        // Missing keys
        assert!(!validate(br#"{"frequency":435,"status":"OK"}"#));
        assert!(!validate(br#"{}"#));
    }

    #[test]
    fn test_parse_reports_missing_keys() {
        let err = DeviceMetadata::parse(br#"{"status":"OK"}"#).unwrap_err();
        match err {
            Error::Validation(msg) => {
                assert!(msg.contains("frequency"));
                assert!(msg.contains("long_status"));
                assert!(!msg.contains("status,"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_typed_accessors() {
        let metadata = DeviceMetadata::parse(
            br#"{"frequency":435.5,"status":"unavail","long_status":"antenna stowed","band":"UHF"}"#,
        )
        .unwrap();
        assert_eq!(metadata.frequency(), Some(435.5));
        assert_eq!(metadata.status_str(), Some("unavail"));
        assert_eq!(metadata.status().unwrap().unwrap(), LinkStatus::Unavailable);
        assert_eq!(metadata.long_status(), Some("antenna stowed"));
        assert_eq!(metadata.get("band"), Some(&Value::from("UHF")));
    }

    #[test]
    fn test_untyped_values() {
        let metadata =
            DeviceMetadata::parse(br#"{"frequency":"high","status":1,"long_status":null}"#)
                .unwrap();
        assert_eq!(metadata.frequency(), None);
        assert!(metadata.status().is_none());
        assert_eq!(metadata.long_status(), None);

        let metadata =
            DeviceMetadata::parse(br#"{"frequency":1,"status":"SMOKING","long_status":""}"#)
                .unwrap();
        assert!(metadata.status().unwrap().is_err());
    }
}
