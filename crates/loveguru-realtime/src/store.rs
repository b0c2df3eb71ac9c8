//! Persistence and push-notification collaborators.
//!
//! The hub only consumes these traits. [`InMemoryStore`] backs the node
//! binary in development and the test suites.

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::RealtimeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who authored a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderKind {
    /// End user.
    User,
    /// Human advisor.
    Advisor,
    /// AI assistant.
    Ai,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderKind::User => "USER",
            SenderKind::Advisor => "ADVISOR",
            SenderKind::Ai => "AI",
        }
    }
}

/// Message persistence consumed by the hub.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent messages of a session, oldest first.
    async fn fetch_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Envelope>, RealtimeError>;

    /// Persist a message.
    async fn insert_message(
        &self,
        session_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        content: &str,
    ) -> Result<(), RealtimeError>;

    /// Persist a message and return its id.
    async fn insert_message_returning_id(
        &self,
        session_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        content: &str,
    ) -> Result<String, RealtimeError>;

    /// Push tokens of every session participant except `exclude_participant`.
    async fn device_tokens_for_session(
        &self,
        _session_id: &str,
        _exclude_participant: &str,
    ) -> Result<Vec<String>, RealtimeError> {
        Ok(Vec::new())
    }

    /// Display name shown in push notifications.
    async fn display_name(&self, _participant_id: &str) -> Result<Option<String>, RealtimeError> {
        Ok(None)
    }
}

/// Push notification dispatch consumed by the hub.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn send_chat_notification(
        &self,
        device_tokens: &[String],
        sender_name: &str,
        content: &str,
        session_id: &str,
    ) -> Result<(), RealtimeError>;
}

/// A persisted chat message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub sender_kind: SenderKind,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    fn to_envelope(&self) -> Envelope {
        Envelope {
            kind: EnvelopeKind::Message,
            session_id: self.session_id.clone(),
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            timestamp: self.created_at,
            data: Some(serde_json::json!({ "message_id": self.id })),
        }
    }
}

/// In-memory message store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    messages: RwLock<HashMap<String, Vec<StoredMessage>>>,
    device_tokens: RwLock<HashMap<String, Vec<String>>>,
    display_names: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a push token for a participant.
    pub fn add_device_token(&self, participant_id: &str, token: &str) {
        self.device_tokens
            .write()
            .entry(participant_id.to_string())
            .or_default()
            .push(token.to_string());
    }

    /// Set a participant's display name.
    pub fn set_display_name(&self, participant_id: &str, name: &str) {
        self.display_names
            .write()
            .insert(participant_id.to_string(), name.to_string());
    }

    /// Number of messages persisted for a session.
    pub fn message_count(&self, session_id: &str) -> usize {
        self.messages
            .read()
            .get(session_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn insert(
        &self,
        session_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        content: &str,
    ) -> String {
        let message = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sender_kind,
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let id = message.id.clone();
        self.messages
            .write()
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        id
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn fetch_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Envelope>, RealtimeError> {
        let messages = self.messages.read();
        let Some(history) = messages.get(session_id) else {
            return Ok(Vec::new());
        };

        // Newest `limit` messages after skipping the newest `offset`.
        let end = history.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(history[start..end]
            .iter()
            .map(StoredMessage::to_envelope)
            .collect())
    }

    async fn insert_message(
        &self,
        session_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        content: &str,
    ) -> Result<(), RealtimeError> {
        self.insert(session_id, sender_kind, sender_id, content);
        Ok(())
    }

    async fn insert_message_returning_id(
        &self,
        session_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        content: &str,
    ) -> Result<String, RealtimeError> {
        Ok(self.insert(session_id, sender_kind, sender_id, content))
    }

    async fn device_tokens_for_session(
        &self,
        session_id: &str,
        exclude_participant: &str,
    ) -> Result<Vec<String>, RealtimeError> {
        let participants: Vec<String> = self
            .messages
            .read()
            .get(session_id)
            .map(|history| {
                let mut ids: Vec<String> = history.iter().map(|m| m.sender_id.clone()).collect();
                ids.sort();
                ids.dedup();
                ids
            })
            .unwrap_or_default();

        let tokens = self.device_tokens.read();
        Ok(participants
            .iter()
            .filter(|p| p.as_str() != exclude_participant)
            .filter_map(|p| tokens.get(p))
            .flatten()
            .cloned()
            .collect())
    }

    async fn display_name(&self, participant_id: &str) -> Result<Option<String>, RealtimeError> {
        Ok(self.display_names.read().get(participant_id).cloned())
    }
}
