//! # LoveGuru Real-time
//!
//! Real-time chat transport for LoveGuru advice sessions.
//!
//! Participants of a session (users, advisors, the AI assistant) hold one
//! long-lived connection each. The hub persists chat messages, fans them out
//! to every member of the session and relays typing indicators and read
//! receipts between participants.
//!
//! ## Features
//!
//! - **Registry**: Single-task event loop owning session membership
//! - **Backpressure**: Bounded per-connection queues; slow consumers are dropped
//! - **Signals**: Typing indicators with idle auto-stop, read receipts
//! - **History**: Recent messages replayed to every new connection
//! - **Liveness**: Periodic probe sweep pruning unresponsive connections
//! - **Sharding**: Sessions hashed onto independent registries
//!
//! ## Example
//!
//! ```rust
//! use loveguru_realtime::{HubConfig, HubManager, InMemoryStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), loveguru_realtime::RealtimeError> {
//! let hubs = HubManager::start(HubConfig::default(), Arc::new(InMemoryStore::new()), None)?;
//!
//! // Admit a participant; drive `connection.run(sink, stream)` over a socket.
//! let connection = hubs.connect("session-1", "user-42").await?;
//! assert_eq!(connection.client().session_id, "session-1");
//!
//! // Push an assistant reply to everyone in the session.
//! hubs.send_ai_message("session-1", "How can I help?").await?;
//!
//! hubs.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Wire Protocol
//!
//! Every text frame carries one JSON envelope:
//!
//! ```json
//! {"type": "MESSAGE", "session_id": "s1", "sender_id": "u1",
//!  "content": "hi", "timestamp": "2024-01-01T00:00:00Z",
//!  "data": {"message_id": "..."}}
//! ```
//!
//! `type` is one of `MESSAGE`, `TYPING_STARTED`, `TYPING_STOPPED` or
//! `READ_RECEIPT`. Inbound `session_id` and `sender_id` are ignored; the
//! hub stamps the connection's own identity.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 HubManager                    │
//! │   sha256(session_id) % shards -> shard        │
//! │                                               │
//! │  ┌──────────────┐        ┌──────────────┐     │
//! │  │  Registry 0  │  ...   │  Registry N  │     │
//! │  │  session ->  │        │              │     │
//! │  │   client ->  │        │              │     │
//! │  │   outbound   │        │              │     │
//! │  └──────▲───────┘        └──────────────┘     │
//! └─────────│─────────────────────────────────────┘
//!           │ HubCommand
//!  ┌────────┴─────────┐
//!  │    Connection    │  read loop:  frames -> store / registry
//!  │  SignalTracker   │  write loop: outbound queue -> socket
//!  └──────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod signals;
pub mod store;

// Re-export main types
pub use client::{create_client, Client, ClientId, ClientReceiver, ClientSender, Outbound};
pub use config::{HubConfig, OriginPolicy};
pub use connection::{Connection, Frame};
pub use envelope::{Envelope, EnvelopeKind, ReadReceiptData, AI_SENDER_ID};
pub use error::RealtimeError;
pub use manager::{shard_index, HubManager};
pub use metrics::{HubMetrics, MetricsSnapshot};
pub use registry::{DisconnectReason, RegistryHandle, RegistryHooks, RegistryStats};
pub use signals::{SignalTracker, TypingEvent, TypingState};
pub use store::{ChatNotifier, InMemoryStore, MessageStore, SenderKind, StoredMessage};
