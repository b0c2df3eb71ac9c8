//! Client connection identity and outbound queue.

use crate::envelope::Envelope;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Unique identifier for a connected client.
pub type ClientId = String;

/// Identity of a live chat connection.
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier.
    pub id: ClientId,
    /// Session this connection is attached to.
    pub session_id: String,
    /// Participant using this connection.
    pub participant_id: String,
    /// When the client connected.
    pub connected_at: DateTime<Utc>,
}

impl Client {
    /// Create a client with a fresh identifier.
    pub fn new(session_id: impl Into<String>, participant_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            connected_at: Utc::now(),
        }
    }
}

/// Items queued for a connection's write loop.
#[derive(Debug)]
pub enum Outbound {
    /// Envelope to encode and write.
    Envelope(Envelope),
    /// Liveness probe; acknowledged once a ping frame was written.
    Probe(oneshot::Sender<()>),
}

/// Sending half of a client's outbound queue.
///
/// Only the registry holds it. Dropping it closes the queue, which is the
/// signal for the write loop to exit.
#[derive(Debug)]
pub struct ClientSender {
    client: Arc<Client>,
    sender: mpsc::Sender<Outbound>,
}

impl ClientSender {
    /// The client this queue belongs to.
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Queue an item without waiting.
    pub fn try_send(&self, item: Outbound) -> Result<(), mpsc::error::TrySendError<Outbound>> {
        self.sender.try_send(item)
    }
}

/// Receiving half of a client's outbound queue.
pub type ClientReceiver = mpsc::Receiver<Outbound>;

/// Create a client with a bounded outbound queue.
pub fn create_client(
    session_id: impl Into<String>,
    participant_id: impl Into<String>,
    capacity: usize,
) -> (ClientSender, ClientReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    let client = Arc::new(Client::new(session_id, participant_id));
    (ClientSender { client, sender }, receiver)
}
