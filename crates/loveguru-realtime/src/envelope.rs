//! Wire envelope exchanged with chat clients in both directions.

use crate::error::RealtimeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Sender id used for assistant-authored messages.
pub const AI_SENDER_ID: &str = "ai";

/// A typed message unit exchanged over a chat connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Session (conversation) the envelope belongs to.
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub session_id: String,

    /// Participant that produced the envelope.
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub sender_id: String,

    /// Free text, required for `MESSAGE`.
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub content: String,

    /// When the envelope was produced. Client-supplied values are replaced
    /// on relay, so an unparseable one falls back to now.
    #[serde(default = "Utc::now", deserialize_with = "deserialize_lenient_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    pub fn new(
        kind: EnvelopeKind,
        session_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    /// A chat message.
    pub fn message(
        session_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(EnvelopeKind::Message, session_id, sender_id, content)
    }

    /// A typing indicator transition.
    pub fn typing(
        session_id: impl Into<String>,
        sender_id: impl Into<String>,
        started: bool,
    ) -> Self {
        let kind = if started {
            EnvelopeKind::TypingStarted
        } else {
            EnvelopeKind::TypingStopped
        };
        Self::new(kind, session_id, sender_id, String::new())
    }

    /// A read receipt relayed on behalf of `reader_id`.
    pub fn read_receipt(
        session_id: impl Into<String>,
        reader_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        let reader_id = reader_id.into();
        let data = serde_json::json!({
            "message_id": message_id.into(),
            "reader_id": reader_id.clone(),
        });
        Self::new(EnvelopeKind::ReadReceipt, session_id, reader_id, String::new()).with_data(data)
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Message id carried in the payload, if any.
    pub fn message_id(&self) -> Option<String> {
        let data = self.data.clone()?;
        serde_json::from_value::<ReadReceiptData>(data)
            .ok()
            .map(|d| d.message_id)
            .filter(|id| !id.is_empty())
    }

    /// Message id of a read receipt, rejecting receipts without one.
    pub fn require_message_id(&self) -> Result<String, RealtimeError> {
        self.message_id().ok_or_else(|| {
            RealtimeError::InvalidEnvelope(format!("{} without message_id", self.kind))
        })
    }
}

/// Envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    /// Chat content.
    Message,
    /// Participant started typing.
    TypingStarted,
    /// Participant stopped typing.
    TypingStopped,
    /// Participant read a message.
    ReadReceipt,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeKind::Message => write!(f, "MESSAGE"),
            EnvelopeKind::TypingStarted => write!(f, "TYPING_STARTED"),
            EnvelopeKind::TypingStopped => write!(f, "TYPING_STOPPED"),
            EnvelopeKind::ReadReceipt => write!(f, "READ_RECEIPT"),
        }
    }
}

/// Payload of a read receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptData {
    /// Message that was read.
    #[serde(alias = "messageId")]
    pub message_id: String,
    /// Reader, filled in by the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<String>,
}

fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|_| Utc::now()))
}
