//! Typing indicators and read receipts for one connection.

use crate::client::Client;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::registry::RegistryHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Typing indicator state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypingState {
    #[default]
    Idle,
    Typing,
}

/// Inputs of the typing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingEvent {
    /// Inbound `TYPING_STARTED`.
    Started,
    /// Inbound `TYPING_STOPPED`.
    Stopped,
    /// The participant sent a chat message.
    MessageSent,
    /// No inbound frame for the idle timeout.
    IdleTimeout,
    /// The connection is going away.
    Closed,
}

impl TypingState {
    /// Next state and the indicator to broadcast to peers, if any.
    pub fn transition(self, event: TypingEvent) -> (TypingState, Option<EnvelopeKind>) {
        match (self, event) {
            (_, TypingEvent::Started) => (TypingState::Typing, Some(EnvelopeKind::TypingStarted)),
            (_, TypingEvent::Stopped) | (_, TypingEvent::Closed) => {
                (TypingState::Idle, Some(EnvelopeKind::TypingStopped))
            }
            (TypingState::Typing, TypingEvent::MessageSent | TypingEvent::IdleTimeout) => {
                (TypingState::Idle, Some(EnvelopeKind::TypingStopped))
            }
            (TypingState::Idle, TypingEvent::MessageSent | TypingEvent::IdleTimeout) => {
                (TypingState::Idle, None)
            }
        }
    }
}

/// Per-connection typing timer and read-receipt relay.
///
/// Signals go to every other participant of the session, never back to
/// the participant that produced them.
pub struct SignalTracker {
    client: Arc<Client>,
    registry: RegistryHandle,
    state: TypingState,
    idle_timeout: Duration,
    deadline: Instant,
}

impl SignalTracker {
    pub fn new(client: Arc<Client>, registry: RegistryHandle, idle_timeout: Duration) -> Self {
        Self {
            client,
            registry,
            state: TypingState::Idle,
            idle_timeout,
            deadline: Instant::now() + idle_timeout,
        }
    }

    pub fn state(&self) -> TypingState {
        self.state
    }

    /// Restart the idle timer; called for every inbound frame.
    pub fn touch(&mut self) {
        self.deadline = Instant::now() + self.idle_timeout;
    }

    /// Resolves when a typing indicator has gone stale. Pending while idle.
    pub async fn idle_expired(&self) {
        match self.state {
            TypingState::Typing => tokio::time::sleep_until(self.deadline).await,
            TypingState::Idle => std::future::pending().await,
        }
    }

    pub async fn typing_started(&mut self) {
        self.apply(TypingEvent::Started).await;
    }

    pub async fn typing_stopped(&mut self) {
        self.apply(TypingEvent::Stopped).await;
    }

    pub async fn message_sent(&mut self) {
        self.apply(TypingEvent::MessageSent).await;
    }

    pub async fn idle_timeout(&mut self) {
        self.apply(TypingEvent::IdleTimeout).await;
    }

    pub async fn connection_closed(&mut self) {
        self.apply(TypingEvent::Closed).await;
    }

    /// Relay that this participant read `message_id`.
    pub async fn read_receipt(&self, message_id: &str) {
        let receipt = Envelope::read_receipt(
            &self.client.session_id,
            &self.client.participant_id,
            message_id,
        );
        self.relay(receipt).await;
    }

    async fn apply(&mut self, event: TypingEvent) {
        let (next, signal) = self.state.transition(event);
        self.state = next;

        if let Some(kind) = signal {
            let envelope = Envelope::typing(
                &self.client.session_id,
                &self.client.participant_id,
                kind == EnvelopeKind::TypingStarted,
            );
            self.relay(envelope).await;
        }
    }

    async fn relay(&self, envelope: Envelope) {
        let kind = envelope.kind;
        if let Err(e) = self
            .registry
            .broadcast_except(envelope, &self.client.participant_id)
            .await
        {
            debug!(client_id = %self.client.id, kind = %kind, error = %e, "Signal dropped");
        }
    }
}
