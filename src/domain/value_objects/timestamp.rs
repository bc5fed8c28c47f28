//! Wire timestamps.
//!
//! Peers send ISO-8601 either with an offset (`2024-01-01T00:00:00Z`) or
//! naive (`2024-01-01T00:00:00.123456`, read as UTC). Anything else is treated
//! as absent rather than failing the whole frame.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Parse an RFC 3339 or naive ISO-8601 timestamp.
pub fn parse(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// `deserialize_with` for optional timestamps.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(parse))
}

/// `deserialize_with` for timestamps that default to now when unreadable.
pub fn deserialize_or_now<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_opt(deserializer)?.unwrap_or_else(Utc::now))
}
