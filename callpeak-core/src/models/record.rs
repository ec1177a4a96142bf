//! Conversation detail records as returned by the analytics API.
//!
//! Vendor responses vary by media type and API version, so every field is
//! optional. Timestamps stay as raw strings until extraction so that one bad
//! value only costs its own segment. A `null` list reads as empty and a list
//! element that fails to decode is dropped on its own, so one malformed
//! session or segment never sinks the whole conversation.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping undecodable list element");
                None
            }
        })
        .collect())
}

/// Strings pass through; any other JSON type reads as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub conversation_id: Option<String>,
    pub conversation_start: Option<String>,
    pub conversation_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub division_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: Option<String>,
    pub participant_name: Option<String>,
    pub purpose: Option<String>,
    pub participant_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: Option<String>,
    pub media_type: Option<String>,
    pub direction: Option<String>,
    pub ani: Option<String>,
    pub dnis: Option<String>,
    pub address_from: Option<String>,
    pub address_to: Option<String>,
    /// Secondary destination; internal legs carry a `sip:` value here
    pub session_dnis: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub segments: Vec<Segment>,
}

impl Session {
    /// Origin address, falling back to `addressFrom`.
    pub fn origin(&self) -> Option<&str> {
        self.ani.as_deref().or(self.address_from.as_deref())
    }

    /// Destination address, falling back to `addressTo`.
    pub fn destination(&self) -> Option<&str> {
        self.dnis.as_deref().or(self.address_to.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(default, deserialize_with = "lenient_string")]
    pub segment_start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub segment_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub segment_type: Option<String>,
}

impl Segment {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        parse_ts(self.segment_start.as_deref()?)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        parse_ts(self.segment_end.as_deref()?)
    }

    pub fn is_wrapup(&self) -> bool {
        self.segment_type
            .as_deref()
            .map(|t| t.trim().eq_ignore_ascii_case("wrapup"))
            .unwrap_or(false)
    }
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
