//! Envelope model exchanged with backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status code carried by successful envelopes.
pub const STATUS_OK: u16 = 200;

/// A tagged, identified, timestamped unit of data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique id. Backends sometimes send numbers; they are kept as strings.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,

    /// Logical message name.
    #[serde(rename = "type", default)]
    pub message_type: String,

    /// Opaque payload.
    #[serde(default)]
    pub body: Value,

    /// Address of the receiver expecting a reply (`host:port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Id of the request this envelope answers.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_string_or_number"
    )]
    pub in_reply_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl Envelope {
    /// Build a new outgoing request envelope with a fresh id.
    pub fn request(message_type: impl Into<String>, body: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            date: Utc::now(),
            message_type: message_type.into(),
            body,
            reply_to: None,
            in_reply_to: None,
            status_code: Some(STATUS_OK),
        }
    }

    /// Build a reply to `request`.
    pub fn reply_to(request: &Envelope, status_code: u16, body: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            date: Utc::now(),
            message_type: format!("{}.result", request.message_type),
            body,
            reply_to: None,
            in_reply_to: Some(request.id.clone()),
            status_code: Some(status_code),
        }
    }

    /// True when no reply is expected.
    pub fn is_volatile(&self) -> bool {
        self.reply_to.is_none()
    }

    /// True unless a non-2xx status code is present.
    pub fn is_success(&self) -> bool {
        self.status_code.map_or(true, |code| (200..300).contains(&code))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Signed(n) => n.to_string(),
            RawId::Unsigned(n) => n.to_string(),
            RawId::Float(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_has_fresh_id_and_ok_status() {
        let a = Envelope::request("search", json!({}));
        let b = Envelope::request("search", json!({}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.status_code, Some(STATUS_OK));
        assert!(a.is_volatile());
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let value = json!({
            "id": 1400000000000u64,
            "date": "2014-05-13T10:00:00.000Z",
            "inReplyTo": "abc",
            "statusCode": 503,
            "type": "testResponse",
            "body": "first call"
        });
        let envelope: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(envelope.id, "1400000000000");
        assert_eq!(envelope.in_reply_to.as_deref(), Some("abc"));
        assert!(!envelope.is_success());
    }

    #[test]
    fn volatile_requests_omit_reply_fields() {
        let envelope = Envelope::request("ping", json!(null));
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("replyTo").is_none());
        assert!(value.get("inReplyTo").is_none());
        assert_eq!(value["type"], "ping");
    }

    #[test]
    fn reply_points_back_to_request() {
        let request = Envelope::request("search", json!({}));
        let reply = Envelope::reply_to(&request, 200, json!([]));
        assert_eq!(reply.in_reply_to, Some(request.id));
        assert!(reply.is_success());
    }
}
