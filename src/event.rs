//! Wire schema of a click event.
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// One link click, as published on the topic. `shortCode` and `timestamp`
/// are required, everything else may be absent or null.
///
/// Serializing produces the same wire format the decoder accepts, which is
/// what the synthetic generator sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub short_code: String,
    pub user_id: Option<i32>,
    /// event-generation time, not ingestion time
    #[serde(rename = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub occurred_at: DateTime<Utc>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Error)]
pub enum MalformedEventError {
    #[error("payload does not decode as a click event: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("message has no payload")]
    Empty,
}

impl ClickEvent {
    /// Decodes one UTF-8 JSON message payload. Unknown fields are ignored
    /// and the short code is not checked against any registry.
    pub fn decode(payload: &[u8]) -> Result<Self, MalformedEventError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Accepts RFC 3339 as well as the zone-less ISO-8601 that
/// `datetime.utcnow().isoformat()`-style producers emit; the latter is
/// taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    Err(serde::de::Error::custom(format!(
        "not an ISO-8601 timestamp: {raw:?}"
    )))
}
