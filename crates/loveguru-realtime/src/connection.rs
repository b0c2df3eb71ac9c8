//! Read and write loops of a single chat connection.
//!
//! The loops are transport-agnostic: they consume a stream of inbound
//! [`Frame`]s and write to a sink of outbound frames. The node crate adapts
//! its WebSocket to these types.

use crate::client::{Client, ClientReceiver, Outbound};
use crate::config::HubConfig;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::RealtimeError;
use crate::registry::{DisconnectReason, RegistryHandle};
use crate::signals::SignalTracker;
use crate::store::{ChatNotifier, MessageStore, SenderKind};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Maximum characters of message content shown in a push notification.
const NOTIFICATION_PREVIEW_CHARS: usize = 50;

/// Transport frame seen by the connection loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON-encoded envelope.
    Text(String),
    /// Keepalive / liveness ping.
    Ping,
    /// Ping response.
    Pong,
    /// Close handshake.
    Close,
}

/// A registered chat connection waiting to be driven over a socket.
pub struct Connection {
    client: Arc<Client>,
    receiver: ClientReceiver,
    registry: RegistryHandle,
}

impl Connection {
    pub(crate) fn new(
        client: Arc<Client>,
        receiver: ClientReceiver,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            client,
            receiver,
            registry,
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Drive the connection until either side goes away.
    ///
    /// When the read loop ends the connection is unregistered and the write
    /// loop gets one write deadline to flush its close frame. When the write
    /// loop ends first (queue closed by the registry or a failed write) the
    /// read loop is dropped. Either way peers receive a final
    /// `TYPING_STOPPED`.
    pub async fn run<Si, St, E>(self, sink: Si, stream: St)
    where
        Si: Sink<Frame> + Unpin,
        Si::Error: Display,
        St: Stream<Item = Result<Frame, E>> + Unpin,
        E: Display,
    {
        let Connection {
            client,
            receiver,
            registry,
        } = self;
        let config = registry.config().clone();
        let mut signals =
            SignalTracker::new(client.clone(), registry.clone(), config.typing_idle_timeout());

        {
            let writer = write_loop(&client, receiver, sink, &config);
            let reader = read_loop(&client, &registry, &mut signals, stream);
            tokio::pin!(writer);
            tokio::pin!(reader);

            tokio::select! {
                _ = &mut writer => {
                    registry.unregister(&client.id, DisconnectReason::Closed).await;
                }
                _ = &mut reader => {
                    registry.unregister(&client.id, DisconnectReason::Closed).await;
                    let _ = tokio::time::timeout(config.write_timeout(), &mut writer).await;
                }
            }
        }

        signals.connection_closed().await;
        info!(client_id = %client.id, session_id = %client.session_id, "Connection closed");
    }
}

async fn write_loop<Si>(
    client: &Client,
    mut receiver: ClientReceiver,
    mut sink: Si,
    config: &HubConfig,
) where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    let write_timeout = config.write_timeout();
    let probe_timeout = config.probe_timeout().min(write_timeout);
    let keepalive = tokio::time::sleep(config.keepalive_interval());
    tokio::pin!(keepalive);

    loop {
        let result = tokio::select! {
            item = receiver.recv() => match item {
                Some(Outbound::Envelope(envelope)) => match serde_json::to_string(&envelope) {
                    Ok(text) => send_frame(&mut sink, Frame::Text(text), write_timeout).await,
                    Err(e) => {
                        warn!(client_id = %client.id, error = %e, "Failed to encode envelope");
                        Ok(())
                    }
                },
                Some(Outbound::Probe(ack)) => {
                    let sent = send_frame(&mut sink, Frame::Ping, probe_timeout).await;
                    if sent.is_ok() {
                        let _ = ack.send(());
                    }
                    sent
                }
                None => {
                    // Queue closed by the registry.
                    let _ = send_frame(&mut sink, Frame::Close, write_timeout).await;
                    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
                    debug!(client_id = %client.id, "Write loop finished");
                    return;
                }
            },
            _ = &mut keepalive => send_frame(&mut sink, Frame::Ping, write_timeout).await,
        };

        if let Err(e) = result {
            debug!(client_id = %client.id, error = %e, "Write failed, closing connection");
            return;
        }

        keepalive.as_mut().reset(Instant::now() + config.keepalive_interval());
    }
}

async fn send_frame<Si>(
    sink: &mut Si,
    frame: Frame,
    deadline: Duration,
) -> Result<(), RealtimeError>
where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RealtimeError::Transport(e.to_string())),
        Err(_) => Err(RealtimeError::WriteTimeout(deadline)),
    }
}

async fn read_loop<St, E>(
    client: &Client,
    registry: &RegistryHandle,
    signals: &mut SignalTracker,
    mut stream: St,
) where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = signals.idle_expired() => {
                signals.idle_timeout().await;
                continue;
            }
        };

        signals.touch();

        match frame {
            Some(Ok(Frame::Text(text))) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => dispatch(client, registry, signals, envelope).await,
                Err(e) => {
                    debug!(
                        client_id = %client.id,
                        error = %e,
                        "Undecodable frame, closing connection"
                    );
                    break;
                }
            },
            Some(Ok(Frame::Ping | Frame::Pong)) => {}
            Some(Ok(Frame::Close)) | None => {
                debug!(client_id = %client.id, "Peer closed connection");
                break;
            }
            Some(Err(e)) => {
                debug!(client_id = %client.id, error = %e, "Read failed, closing connection");
                break;
            }
        }
    }
}

async fn dispatch(
    client: &Client,
    registry: &RegistryHandle,
    signals: &mut SignalTracker,
    envelope: Envelope,
) {
    match envelope.kind {
        EnvelopeKind::Message => {
            if envelope.content.is_empty() {
                debug!(client_id = %client.id, "Empty message ignored");
                return;
            }
            if publish_message(client, registry, envelope.content).await {
                signals.message_sent().await;
            }
        }
        EnvelopeKind::TypingStarted => signals.typing_started().await,
        EnvelopeKind::TypingStopped => signals.typing_stopped().await,
        EnvelopeKind::ReadReceipt => match envelope.require_message_id() {
            Ok(message_id) => signals.read_receipt(&message_id).await,
            Err(e) => debug!(client_id = %client.id, error = %e, "Read receipt ignored"),
        },
    }
}

/// Persist a chat message, then broadcast it to the whole session.
///
/// Nothing is broadcast when persistence fails. Returns whether the message
/// went out.
async fn publish_message(client: &Client, registry: &RegistryHandle, content: String) -> bool {
    let store = registry.store();
    let message_id = match store
        .insert_message_returning_id(
            &client.session_id,
            SenderKind::User,
            &client.participant_id,
            &content,
        )
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(
                client_id = %client.id,
                session_id = %client.session_id,
                error = %e,
                "Failed to persist message, not broadcasting"
            );
            return false;
        }
    };

    let envelope = Envelope::message(&client.session_id, &client.participant_id, &content)
        .with_data(serde_json::json!({ "message_id": message_id }));

    if let Err(e) = registry.broadcast(envelope).await {
        debug!(client_id = %client.id, error = %e, "Broadcast dropped");
        return false;
    }

    if let Some(notifier) = registry.notifier() {
        spawn_push_notification(
            store.clone(),
            notifier.clone(),
            client.session_id.clone(),
            client.participant_id.clone(),
            content,
        );
    }

    true
}

fn spawn_push_notification(
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn ChatNotifier>,
    session_id: String,
    sender_id: String,
    content: String,
) {
    tokio::spawn(async move {
        let tokens = match store.device_tokens_for_session(&session_id, &sender_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to load device tokens");
                return;
            }
        };
        if tokens.is_empty() {
            return;
        }

        let sender_name = match store.display_name(&sender_id).await {
            Ok(Some(name)) => name,
            Ok(None) => "Someone".to_string(),
            Err(e) => {
                warn!(sender_id = %sender_id, error = %e, "Failed to load sender name");
                "Someone".to_string()
            }
        };

        let preview = notification_preview(&content);
        if let Err(e) = notifier
            .send_chat_notification(&tokens, &sender_name, &preview, &session_id)
            .await
        {
            warn!(session_id = %session_id, error = %e, "Push notification failed");
        }
    });
}

fn notification_preview(content: &str) -> String {
    if content.chars().count() > NOTIFICATION_PREVIEW_CHARS {
        let truncated: String = content.chars().take(NOTIFICATION_PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    } else {
        content.to_string()
    }
}
