//! Server-confirmed message model and the lenient decoding rules for rows coming off the
//! live message feed.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageSender {
    User,
    // Anything the backend labels other than "user" is treated as a bot row: it renders,
    // but never reconciles against an optimistic entry.
    Bot,
}

impl MessageSender {
    /// Case-insensitive. Every ingestion path goes through here.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("user") {
            Self::User
        } else {
            Self::Bot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }
}

impl<'de> Deserialize<'de> for MessageSender {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// A row observed on the live feed. Immutable once observed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub sender: MessageSender,
    /// `None` when the backend sent no timestamp or one we could not parse.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        sender: MessageSender,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sender,
            created_at,
        }
    }

    pub fn content_key(&self) -> &str {
        content_key(&self.content)
    }
}

/// Identity of a message body for reconciliation purposes.
pub fn content_key(content: &str) -> &str {
    content.trim()
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 (with offset) and zone-less ISO 8601 as emitted for Postgres
/// `timestamp` columns, which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn timestamp_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::String(s) => parse_timestamp(&s),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    })
}

/// Raw message row as handed over by the host's subscription layer.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct LiveMessage {
    pub id: String,
    pub content: String,
    pub sender: String,
    pub created_at: Option<String>,
}

impl From<LiveMessage> for Message {
    fn from(raw: LiveMessage) -> Self {
        Message {
            created_at: raw.created_at.as_deref().and_then(parse_timestamp),
            sender: MessageSender::parse(&raw.sender),
            id: raw.id,
            content: raw.content,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LivePayloadError {
    #[error("live payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("live payload has no messages array")]
    MissingMessages,
}

/// Decode a subscription payload into a full snapshot.
///
/// Accepted shapes: `{"messages": [...]}`, `{"data": {"messages": [...]}}` or a bare array.
/// Rows that fail to decode are skipped; a missing array is an error.
pub fn parse_live_payload(json: &str) -> Result<Vec<Message>, LivePayloadError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let rows = match &value {
        serde_json::Value::Array(rows) => rows,
        serde_json::Value::Object(obj) => obj
            .get("messages")
            .or_else(|| obj.get("data").and_then(|d| d.get("messages")))
            .and_then(|m| m.as_array())
            .ok_or(LivePayloadError::MissingMessages)?,
        _ => return Err(LivePayloadError::MissingMessages),
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match Message::deserialize(row) {
            Ok(m) => out.push(m),
            Err(e) => tracing::warn!(err = %e, "skipping undecodable live message row"),
        }
    }
    Ok(out)
}
