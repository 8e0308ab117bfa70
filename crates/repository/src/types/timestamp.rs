//! Backend timestamp representations.
//!
//! Document stores hand timestamps back in more than one shape. The converter
//! decodes every shape into a single `DateTime<Utc>` on read, so no code past
//! the boundary has to inspect timestamp values again.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Field name for the seconds component of a native timestamp.
pub const SECONDS_FIELD: &str = "_seconds";

/// Field name for the nanoseconds component of a native timestamp.
pub const NANOS_FIELD: &str = "_nanoseconds";

/// A timestamp as it may appear in a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// The store's native representation (seconds + nanoseconds since the epoch).
    Native {
        #[serde(rename = "_seconds")]
        seconds: i64,
        #[serde(rename = "_nanoseconds")]
        nanoseconds: u32,
    },
    /// Milliseconds since the epoch.
    EpochMillis(i64),
    /// An RFC 3339 string.
    Text(String),
}

impl WireTimestamp {
    /// Parses a JSON value into a wire timestamp, if it has a timestamp shape.
    ///
    /// Strings only qualify when they parse as RFC 3339, so ordinary text
    /// fields are never mistaken for timestamps.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let seconds = map.get(SECONDS_FIELD)?.as_i64()?;
                let nanoseconds = map.get(NANOS_FIELD)?.as_u64()?;
                if map.len() != 2 || nanoseconds >= 1_000_000_000 {
                    return None;
                }
                Some(WireTimestamp::Native {
                    seconds,
                    nanoseconds: nanoseconds as u32,
                })
            }
            Value::Number(n) => n.as_i64().map(WireTimestamp::EpochMillis),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|_| WireTimestamp::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts to the canonical in-memory time type.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Native {
                seconds,
                nanoseconds,
            } => Utc.timestamp_opt(*seconds, *nanoseconds).single(),
            WireTimestamp::EpochMillis(millis) => Utc.timestamp_millis_opt(*millis).single(),
            WireTimestamp::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        WireTimestamp::Native {
            seconds: dt.timestamp(),
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}

/// Decodes any supported timestamp shape.
pub fn decode(value: &Value) -> Option<DateTime<Utc>> {
    WireTimestamp::from_value(value)?.to_datetime()
}

/// Encodes a timestamp in the store's native shape.
pub fn encode(dt: DateTime<Utc>) -> Value {
    json!({
        SECONDS_FIELD: dt.timestamp(),
        NANOS_FIELD: dt.timestamp_subsec_nanos(),
    })
}

/// Returns `true` if the value is a native timestamp object.
pub fn is_native(value: &Value) -> bool {
    matches!(
        WireTimestamp::from_value(value),
        Some(WireTimestamp::Native { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_round_trip_preserves_nanos() {
        let dt = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let encoded = encode(dt);
        assert!(is_native(&encoded));
        assert_eq!(decode(&encoded), Some(dt));
    }

    #[test]
    fn test_decode_rfc3339_and_millis() {
        let text = Value::String("2024-01-15T10:30:00Z".to_string());
        let millis = json!(1_705_314_600_000i64);
        assert_eq!(decode(&text), decode(&millis));
    }

    #[test]
    fn test_plain_strings_are_not_timestamps() {
        assert!(decode(&json!("SKU-001")).is_none());
        assert!(decode(&json!({"_seconds": 1, "other": 2})).is_none());
        assert!(decode(&json!(true)).is_none());
    }
}
