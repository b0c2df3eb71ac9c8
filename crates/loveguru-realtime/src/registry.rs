//! Registry event loop owning connection membership and broadcast.
//!
//! Every mutation of the membership map happens inside one task that
//! processes [`HubCommand`]s strictly in order. Connection loops and
//! external callers only talk to it through a [`RegistryHandle`].

use crate::client::{create_client, Client, ClientId, ClientSender, Outbound};
use crate::config::HubConfig;
use crate::connection::Connection;
use crate::envelope::{Envelope, AI_SENDER_ID};
use crate::error::RealtimeError;
use crate::metrics::HubMetrics;
use crate::store::{ChatNotifier, MessageStore};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed, protocol error or write failure.
    Closed,
    /// Outbound queue was full.
    Backpressure,
    /// Liveness probe was not acknowledged in time.
    Liveness,
    /// Registry shut down.
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "closed"),
            DisconnectReason::Backpressure => write!(f, "backpressure"),
            DisconnectReason::Liveness => write!(f, "liveness"),
            DisconnectReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Lifecycle callbacks invoked from inside the registry loop.
///
/// Implementations must not block; they run on the loop's task.
pub trait RegistryHooks: Send + Sync + 'static {
    fn on_register(&self, _client: &Client) {}

    fn on_unregister(&self, _client: &Client, _reason: DisconnectReason) {}

    /// Called once per broadcast with the number of member queues reached.
    fn on_broadcast(&self, _envelope: &Envelope, _delivered: usize) {}

    fn on_shutdown(&self) {}
}

impl RegistryHooks for () {}

impl<T: RegistryHooks + ?Sized> RegistryHooks for Arc<T> {
    fn on_register(&self, client: &Client) {
        (**self).on_register(client)
    }

    fn on_unregister(&self, client: &Client, reason: DisconnectReason) {
        (**self).on_unregister(client, reason)
    }

    fn on_broadcast(&self, envelope: &Envelope, delivered: usize) {
        (**self).on_broadcast(envelope, delivered)
    }

    fn on_shutdown(&self) {
        (**self).on_shutdown()
    }
}

/// Commands processed by the registry loop.
pub(crate) enum HubCommand {
    Register {
        sender: ClientSender,
        ack: oneshot::Sender<Result<(), RealtimeError>>,
    },
    Unregister {
        client_id: ClientId,
        reason: DisconnectReason,
    },
    Broadcast {
        envelope: Envelope,
        exclude_participant: Option<String>,
    },
    Replay {
        client_id: ClientId,
        envelopes: Vec<Envelope>,
    },
    Sweep,
    Stats(oneshot::Sender<RegistryStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Membership counts of one registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Sessions with at least one connection.
    pub sessions: usize,
    /// Registered connections.
    pub connections: usize,
}

struct Shared {
    config: HubConfig,
    store: Arc<dyn MessageStore>,
    notifier: Option<Arc<dyn ChatNotifier>>,
}

/// Cloneable handle submitting commands to a registry loop.
#[derive(Clone)]
pub struct RegistryHandle {
    commands: mpsc::Sender<HubCommand>,
    shared: Arc<Shared>,
}

impl RegistryHandle {
    /// Spawn a registry without lifecycle hooks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: HubConfig, store: Arc<dyn MessageStore>) -> Result<Self, RealtimeError> {
        Self::spawn_with_hooks(config, store, None, ())
    }

    /// Spawn a registry that keeps connection and delivery counters.
    pub fn spawn_with_metrics(
        config: HubConfig,
        store: Arc<dyn MessageStore>,
        notifier: Option<Arc<dyn ChatNotifier>>,
    ) -> Result<(Self, Arc<HubMetrics>), RealtimeError> {
        let metrics = Arc::new(HubMetrics::new());
        let handle = Self::spawn_with_hooks(config, store, notifier, metrics.clone())?;
        Ok((handle, metrics))
    }

    /// Spawn a registry loop running `hooks` on every lifecycle event.
    ///
    /// `config` is validated first; zero intervals or capacities are rejected.
    pub fn spawn_with_hooks<H: RegistryHooks>(
        config: HubConfig,
        store: Arc<dyn MessageStore>,
        notifier: Option<Arc<dyn ChatNotifier>>,
        hooks: H,
    ) -> Result<Self, RealtimeError> {
        config.validate()?;

        let (commands, receiver) = mpsc::channel(config.command_capacity);
        let shared = Arc::new(Shared {
            config,
            store,
            notifier,
        });

        let registry = Registry {
            sessions: HashMap::new(),
            index: HashMap::new(),
            hooks,
            shared: shared.clone(),
            commands: commands.downgrade(),
        };
        tokio::spawn(registry.run(receiver));

        Ok(Self { commands, shared })
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.shared.store
    }

    pub fn notifier(&self) -> Option<&Arc<dyn ChatNotifier>> {
        self.shared.notifier.as_ref()
    }

    /// Admit a participant into a session and return its connection.
    pub async fn connect(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<Connection, RealtimeError> {
        let (sender, receiver) = create_client(
            session_id,
            participant_id,
            self.shared.config.outbound_capacity.max(1),
        );
        let client = sender.client().clone();
        self.register(sender).await?;
        Ok(Connection::new(client, receiver, self.clone()))
    }

    /// Insert a client's outbound queue into the membership set.
    pub async fn register(&self, sender: ClientSender) -> Result<(), RealtimeError> {
        let (ack, response) = oneshot::channel();
        self.submit(HubCommand::Register { sender, ack }).await?;
        response.await.map_err(|_| RealtimeError::RegistryClosed)?
    }

    /// Remove a client and close its outbound queue. Unknown ids are ignored.
    pub async fn unregister(&self, client_id: &str, reason: DisconnectReason) {
        let command = HubCommand::Unregister {
            client_id: client_id.to_string(),
            reason,
        };
        if self.submit(command).await.is_err() {
            debug!(client_id = %client_id, "Unregister after registry shutdown");
        }
    }

    /// Deliver an envelope to every member of its session.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), RealtimeError> {
        self.submit(HubCommand::Broadcast {
            envelope,
            exclude_participant: None,
        })
        .await
    }

    /// Deliver an envelope to every member of its session except `participant_id`.
    pub async fn broadcast_except(
        &self,
        envelope: Envelope,
        participant_id: &str,
    ) -> Result<(), RealtimeError> {
        self.submit(HubCommand::Broadcast {
            envelope,
            exclude_participant: Some(participant_id.to_string()),
        })
        .await
    }

    /// Broadcast an assistant reply to a session.
    pub async fn send_ai_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<(), RealtimeError> {
        self.broadcast(Envelope::message(session_id, AI_SENDER_ID, content))
            .await
    }

    /// Run a health sweep now instead of waiting for the timer.
    pub async fn sweep(&self) -> Result<(), RealtimeError> {
        self.submit(HubCommand::Sweep).await
    }

    /// Current membership counts.
    pub async fn stats(&self) -> Result<RegistryStats, RealtimeError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubCommand::Stats(tx)).await?;
        rx.await.map_err(|_| RealtimeError::RegistryClosed)
    }

    /// Close every connection and stop the loop.
    pub async fn shutdown(&self) -> Result<(), RealtimeError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubCommand::Shutdown(tx)).await?;
        rx.await.map_err(|_| RealtimeError::RegistryClosed)
    }

    async fn submit(&self, command: HubCommand) -> Result<(), RealtimeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RealtimeError::RegistryClosed)
    }
}

/// State owned by the registry task.
struct Registry<H> {
    /// Members indexed by session, then client.
    sessions: HashMap<String, HashMap<ClientId, ClientSender>>,
    /// Client to session lookup.
    index: HashMap<ClientId, String>,
    hooks: H,
    shared: Arc<Shared>,
    /// Used by spawned replay and probe tasks; weak so handles control the loop lifetime.
    commands: mpsc::WeakSender<HubCommand>,
}

impl<H: RegistryHooks> Registry<H> {
    async fn run(mut self, mut receiver: mpsc::Receiver<HubCommand>) {
        let period = self.shared.config.sweep_interval();
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(command) => {
                        if !self.handle(command) {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                _ = sweep.tick() => self.sweep(),
            }
        }
    }

    /// Process one command; returns false once the loop must stop.
    fn handle(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Register { sender, ack } => {
                let _ = ack.send(self.register(sender));
            }
            HubCommand::Unregister { client_id, reason } => {
                self.unregister(&client_id, reason);
            }
            HubCommand::Broadcast {
                envelope,
                exclude_participant,
            } => self.broadcast(envelope, exclude_participant.as_deref()),
            HubCommand::Replay {
                client_id,
                envelopes,
            } => self.replay(&client_id, envelopes),
            HubCommand::Sweep => self.sweep(),
            HubCommand::Stats(tx) => {
                let _ = tx.send(RegistryStats {
                    sessions: self.sessions.len(),
                    connections: self.index.len(),
                });
            }
            HubCommand::Shutdown(ack) => {
                self.shutdown();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn register(&mut self, sender: ClientSender) -> Result<(), RealtimeError> {
        let max = self.shared.config.max_connections;
        if self.index.len() >= max {
            warn!(max_connections = max, "Connection rejected, registry full");
            return Err(RealtimeError::ConnectionLimit(max));
        }

        let client = sender.client().clone();
        self.index.insert(client.id.clone(), client.session_id.clone());
        self.sessions
            .entry(client.session_id.clone())
            .or_default()
            .insert(client.id.clone(), sender);
        self.hooks.on_register(&client);

        info!(
            client_id = %client.id,
            session_id = %client.session_id,
            participant_id = %client.participant_id,
            "Client registered"
        );

        self.spawn_replay(client);
        Ok(())
    }

    fn unregister(&mut self, client_id: &str, reason: DisconnectReason) -> bool {
        let Some(session_id) = self.index.remove(client_id) else {
            return false;
        };

        let removed = match self.sessions.get_mut(&session_id) {
            Some(members) => {
                let removed = members.remove(client_id);
                if members.is_empty() {
                    self.sessions.remove(&session_id);
                }
                removed
            }
            None => None,
        };

        match removed {
            Some(sender) => {
                self.hooks.on_unregister(sender.client(), reason);
                info!(
                    client_id = %client_id,
                    session_id = %session_id,
                    reason = %reason,
                    "Client unregistered"
                );
                // Dropping the sender closes the outbound queue.
                drop(sender);
                true
            }
            None => false,
        }
    }

    fn broadcast(&mut self, envelope: Envelope, exclude_participant: Option<&str>) {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        if let Some(members) = self.sessions.get(&envelope.session_id) {
            for (client_id, member) in members {
                if exclude_participant == Some(member.client().participant_id.as_str()) {
                    continue;
                }
                match member.try_send(Outbound::Envelope(envelope.clone())) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        dropped.push((client_id.clone(), DisconnectReason::Backpressure))
                    }
                    Err(TrySendError::Closed(_)) => {
                        dropped.push((client_id.clone(), DisconnectReason::Closed))
                    }
                }
            }
        }

        for (client_id, reason) in dropped {
            if reason == DisconnectReason::Backpressure {
                warn!(client_id = %client_id, "Outbound queue full, dropping slow consumer");
            }
            self.unregister(&client_id, reason);
        }

        self.hooks.on_broadcast(&envelope, delivered);

        debug!(
            session_id = %envelope.session_id,
            kind = %envelope.kind,
            recipients = delivered,
            "Envelope broadcast"
        );
    }

    fn replay(&mut self, client_id: &str, envelopes: Vec<Envelope>) {
        let Some(session_id) = self.index.get(client_id) else {
            return;
        };
        let Some(member) = self
            .sessions
            .get(session_id)
            .and_then(|members| members.get(client_id))
        else {
            return;
        };

        let mut replayed = 0;
        for envelope in envelopes {
            if envelope.session_id != *session_id {
                continue;
            }
            if member.try_send(Outbound::Envelope(envelope)).is_err() {
                break;
            }
            replayed += 1;
        }

        debug!(client_id = %client_id, replayed, "History replayed");
    }

    fn spawn_replay(&self, client: Arc<Client>) {
        let limit = self.shared.config.history_limit;
        if limit == 0 {
            return;
        }

        let store = self.shared.store.clone();
        let commands = self.commands.clone();
        let deadline = self.shared.config.replay_timeout();

        tokio::spawn(async move {
            let replay = async {
                let envelopes = store
                    .fetch_recent_messages(&client.session_id, limit, 0)
                    .await?;
                if envelopes.is_empty() {
                    return Ok(());
                }
                let commands = commands.upgrade().ok_or(RealtimeError::RegistryClosed)?;
                commands
                    .send(HubCommand::Replay {
                        client_id: client.id.clone(),
                        envelopes,
                    })
                    .await
                    .map_err(|_| RealtimeError::RegistryClosed)
            };

            match tokio::time::timeout(deadline, replay).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(client_id = %client.id, error = %e, "History replay failed")
                }
                Err(_) => debug!(client_id = %client.id, "History replay abandoned"),
            }
        });
    }

    fn sweep(&mut self) {
        let mut pending = Vec::new();
        let mut dropped = Vec::new();

        for members in self.sessions.values() {
            for (client_id, member) in members {
                let (ack, probe) = oneshot::channel();
                match member.try_send(Outbound::Probe(ack)) {
                    Ok(()) => pending.push((client_id.clone(), probe)),
                    Err(TrySendError::Full(_)) => {
                        dropped.push((client_id.clone(), DisconnectReason::Backpressure))
                    }
                    Err(TrySendError::Closed(_)) => {
                        dropped.push((client_id.clone(), DisconnectReason::Closed))
                    }
                }
            }
        }

        for (client_id, reason) in dropped {
            self.unregister(&client_id, reason);
        }

        if pending.is_empty() {
            return;
        }

        debug!(probes = pending.len(), "Health sweep started");

        let commands = self.commands.clone();
        let deadline = self.shared.config.probe_timeout();

        tokio::spawn(async move {
            let results = join_all(pending.into_iter().map(|(client_id, probe)| async move {
                let alive = matches!(tokio::time::timeout(deadline, probe).await, Ok(Ok(())));
                (client_id, alive)
            }))
            .await;

            let Some(commands) = commands.upgrade() else {
                return;
            };
            for (client_id, alive) in results {
                if alive {
                    continue;
                }
                warn!(client_id = %client_id, "Liveness probe failed");
                let _ = commands
                    .send(HubCommand::Unregister {
                        client_id,
                        reason: DisconnectReason::Liveness,
                    })
                    .await;
            }
        });
    }

    fn shutdown(&mut self) {
        let connections = self.index.len();
        for (_, members) in self.sessions.drain() {
            for (_, sender) in members {
                self.hooks.on_unregister(sender.client(), DisconnectReason::Shutdown);
            }
        }
        self.index.clear();
        self.hooks.on_shutdown();

        info!(connections, "Registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientReceiver;
    use crate::envelope::EnvelopeKind;
    use crate::store::{InMemoryStore, SenderKind};
    use async_trait::async_trait;
    use std::time::Duration;

    fn spawn_registry(config: HubConfig) -> RegistryHandle {
        RegistryHandle::spawn(config, Arc::new(InMemoryStore::new())).unwrap()
    }

    async fn join(
        registry: &RegistryHandle,
        session_id: &str,
        participant_id: &str,
        capacity: usize,
    ) -> (ClientId, ClientReceiver) {
        let (sender, receiver) = create_client(session_id, participant_id, capacity);
        let client_id = sender.client().id.clone();
        registry.register(sender).await.unwrap();
        (client_id, receiver)
    }

    fn next_envelope(rx: &mut ClientReceiver) -> Option<Envelope> {
        match rx.try_recv() {
            Ok(Outbound::Envelope(envelope)) => Some(envelope),
            _ => None,
        }
    }

    /// Acknowledge probes and discard envelopes, like a healthy write loop.
    fn spawn_responsive(mut rx: ClientReceiver) {
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                if let Outbound::Probe(ack) = item {
                    let _ = ack.send(());
                }
            }
        });
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = spawn_registry(HubConfig::default());
        let (client_id, mut rx) = join(&registry, "s1", "alice", 8).await;

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.sessions, 1);

        registry
            .unregister(&client_id, DisconnectReason::Closed)
            .await;
        assert_eq!(registry.stats().await.unwrap(), RegistryStats::default());

        // Queue closed once the registry dropped its sender.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_ignored() {
        let registry = spawn_registry(HubConfig::default());
        registry
            .unregister("missing", DisconnectReason::Closed)
            .await;
        assert_eq!(registry.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let registry = spawn_registry(HubConfig {
            max_connections: 1,
            ..Default::default()
        });
        let _first = join(&registry, "s1", "alice", 8).await;

        let (sender, _rx) = create_client("s1", "bob", 8);
        let result = registry.register(sender).await;
        assert!(matches!(result, Err(RealtimeError::ConnectionLimit(1))));
    }

    #[tokio::test]
    async fn test_broadcast_scoped_to_session() {
        let registry = spawn_registry(HubConfig::default());
        let (_, mut rx1) = join(&registry, "s1", "alice", 8).await;
        let (_, mut rx2) = join(&registry, "s2", "bob", 8).await;

        registry
            .broadcast(Envelope::message("s1", "alice", "hi"))
            .await
            .unwrap();
        registry.stats().await.unwrap();

        let received = next_envelope(&mut rx1).unwrap();
        assert_eq!(received.session_id, "s1");
        assert_eq!(received.content, "hi");
        assert!(next_envelope(&mut rx2).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_participant() {
        let registry = spawn_registry(HubConfig::default());
        let (_, mut alice) = join(&registry, "s1", "alice", 8).await;
        let (_, mut bob) = join(&registry, "s1", "bob", 8).await;
        let (_, mut carol) = join(&registry, "s1", "carol", 8).await;

        registry
            .broadcast_except(Envelope::typing("s1", "alice", true), "alice")
            .await
            .unwrap();
        registry.stats().await.unwrap();

        assert!(next_envelope(&mut alice).is_none());
        assert_eq!(
            next_envelope(&mut bob).unwrap().kind,
            EnvelopeKind::TypingStarted
        );
        assert_eq!(
            next_envelope(&mut carol).unwrap().kind,
            EnvelopeKind::TypingStarted
        );
    }

    #[tokio::test]
    async fn test_slow_consumer_dropped() {
        let registry = spawn_registry(HubConfig::default());
        let (_, mut slow) = join(&registry, "s1", "slow", 4).await;
        let (_, mut fast) = join(&registry, "s1", "fast", 4).await;

        let mut fast_received = 0;
        for i in 0..10 {
            registry
                .broadcast(Envelope::message("s1", "bob", format!("m{}", i)))
                .await
                .unwrap();
            registry.stats().await.unwrap();
            while next_envelope(&mut fast).is_some() {
                fast_received += 1;
            }
        }

        assert_eq!(fast_received, 10);
        assert_eq!(registry.stats().await.unwrap().connections, 1);

        // The slow queue kept what fit, then was closed.
        let mut buffered = 0;
        while let Some(item) = slow.recv().await {
            assert!(matches!(item, Outbound::Envelope(_)));
            buffered += 1;
        }
        assert_eq!(buffered, 4);
    }

    #[tokio::test]
    async fn test_closed_queue_removed_on_broadcast() {
        let registry = spawn_registry(HubConfig::default());
        let (_, rx) = join(&registry, "s1", "alice", 4).await;
        drop(rx);

        registry
            .broadcast(Envelope::message("s1", "bob", "hi"))
            .await
            .unwrap();
        assert_eq!(registry.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_ai_message_broadcast() {
        let registry = spawn_registry(HubConfig::default());
        let (_, mut rx) = join(&registry, "s1", "alice", 4).await;

        registry.send_ai_message("s1", "How can I help?").await.unwrap();
        registry.stats().await.unwrap();

        let envelope = next_envelope(&mut rx).unwrap();
        assert_eq!(envelope.sender_id, AI_SENDER_ID);
        assert_eq!(envelope.kind, EnvelopeKind::Message);
    }

    #[tokio::test]
    async fn test_history_replayed_to_newcomer_only() {
        let store = Arc::new(InMemoryStore::new());
        for content in ["one", "two", "three"] {
            store
                .insert_message("s1", SenderKind::User, "alice", content)
                .await
                .unwrap();
        }
        let registry = RegistryHandle::spawn(HubConfig::default(), store).unwrap();

        let (_, mut existing) = join(&registry, "s1", "alice", 8).await;
        let first = tokio::time::timeout(Duration::from_secs(1), existing.recv())
            .await
            .unwrap();
        assert!(matches!(first, Some(Outbound::Envelope(_))));
        while existing.try_recv().is_ok() {}

        let (_, mut newcomer) = join(&registry, "s1", "bob", 8).await;
        let mut replayed = Vec::new();
        while replayed.len() < 3 {
            match tokio::time::timeout(Duration::from_secs(1), newcomer.recv()).await {
                Ok(Some(Outbound::Envelope(envelope))) => replayed.push(envelope.content),
                _ => panic!("history replay incomplete"),
            }
        }
        assert_eq!(replayed, vec!["one", "two", "three"]);

        registry.stats().await.unwrap();
        assert!(next_envelope(&mut existing).is_none());
    }

    struct StalledStore;

    #[async_trait]
    impl MessageStore for StalledStore {
        async fn fetch_recent_messages(
            &self,
            _session_id: &str,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<Envelope>, RealtimeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![Envelope::message("s1", "alice", "late")])
        }

        async fn insert_message(
            &self,
            _session_id: &str,
            _sender_kind: SenderKind,
            _sender_id: &str,
            _content: &str,
        ) -> Result<(), RealtimeError> {
            Ok(())
        }

        async fn insert_message_returning_id(
            &self,
            _session_id: &str,
            _sender_kind: SenderKind,
            _sender_id: &str,
            _content: &str,
        ) -> Result<String, RealtimeError> {
            Ok("m1".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_abandoned_after_timeout() {
        let registry = RegistryHandle::spawn(HubConfig::default(), Arc::new(StalledStore)).unwrap();
        let (_, mut rx) = join(&registry, "s1", "alice", 8).await;

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(registry.stats().await.unwrap().connections, 1);
        assert!(next_envelope(&mut rx).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_prunes_unresponsive() {
        let registry = spawn_registry(HubConfig::default());
        let (_, _silent) = join(&registry, "s1", "silent", 8).await;
        let (_, healthy) = join(&registry, "s1", "healthy", 8).await;
        spawn_responsive(healthy);

        registry.sweep().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_runs() {
        let registry = spawn_registry(HubConfig::default());
        let (_, _silent) = join(&registry, "s1", "silent", 8).await;

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(registry.stats().await.unwrap().connections, 1);

        // First tick at 60s, probe timeout 5s later.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(registry.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_sweep_drops_closed_queue() {
        let registry = spawn_registry(HubConfig::default());
        let (_, rx) = join(&registry, "s1", "alice", 4).await;
        drop(rx);

        registry.sweep().await.unwrap();
        assert_eq!(registry.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_zero_intervals_rejected_at_spawn() {
        for config in [
            HubConfig {
                sweep_interval_secs: 0,
                ..Default::default()
            },
            HubConfig {
                keepalive_interval_secs: 0,
                ..Default::default()
            },
        ] {
            let result = RegistryHandle::spawn(config, Arc::new(InMemoryStore::new()));
            assert!(matches!(result, Err(RealtimeError::InvalidConfig(_))));
        }

        // A valid registry keeps serving after a rejected one.
        let registry = spawn_registry(HubConfig::default());
        let (_, _rx) = join(&registry, "s1", "alice", 4).await;
        assert_eq!(registry.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues() {
        let (registry, metrics) = RegistryHandle::spawn_with_metrics(
            HubConfig::default(),
            Arc::new(InMemoryStore::new()),
            None,
        )
        .unwrap();
        let (_, mut rx1) = join(&registry, "s1", "alice", 4).await;
        let (_, mut rx2) = join(&registry, "s2", "bob", 4).await;
        assert_eq!(metrics.snapshot().active_connects, 2);

        registry.shutdown().await.unwrap();

        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_none());
        assert_eq!(metrics.snapshot().active_connects, 0);
        assert!(matches!(
            registry.stats().await,
            Err(RealtimeError::RegistryClosed)
        ));
    }

    #[tokio::test]
    async fn test_metrics_hooks_compose_with_loop() {
        let (registry, metrics) = RegistryHandle::spawn_with_metrics(
            HubConfig::default(),
            Arc::new(InMemoryStore::new()),
            None,
        )
        .unwrap();
        let before = metrics.snapshot().active_connects;

        let (alice, _rx_a) = join(&registry, "s1", "alice", 4).await;
        let (_bob, _rx_b) = join(&registry, "s1", "bob", 4).await;
        registry
            .broadcast(Envelope::message("s1", "alice", "hi"))
            .await
            .unwrap();
        registry.unregister(&alice, DisconnectReason::Closed).await;
        registry.stats().await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connects, 2);
        assert_eq!(snapshot.active_connects, before + 1);
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.disconnects, 1);
    }
}
