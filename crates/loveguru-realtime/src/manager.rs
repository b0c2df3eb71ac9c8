//! Session-affine sharding across independent registries.
//!
//! Every session hashes to exactly one shard, so a session's membership,
//! ordering and broadcasts never cross registry boundaries.

use crate::config::HubConfig;
use crate::connection::Connection;
use crate::error::RealtimeError;
use crate::metrics::{HubMetrics, MetricsSnapshot};
use crate::registry::{RegistryHandle, RegistryStats};
use crate::store::{ChatNotifier, MessageStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Shard owning `session_id` among `shard_count` shards.
///
/// Uses the first eight bytes of the SHA-256 digest as a big-endian integer,
/// which is stable across processes and releases.
pub fn shard_index(session_id: &str, shard_count: usize) -> usize {
    let digest = Sha256::digest(session_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count.max(1) as u64) as usize
}

struct Shard {
    handle: RegistryHandle,
    metrics: Arc<HubMetrics>,
}

/// Routes sessions to a fixed set of registry shards.
pub struct HubManager {
    shards: Vec<Shard>,
}

impl HubManager {
    /// Validate `config` and spawn one registry per shard.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: HubConfig,
        store: Arc<dyn MessageStore>,
        notifier: Option<Arc<dyn ChatNotifier>>,
    ) -> Result<Self, RealtimeError> {
        config.validate()?;

        let shards = (0..config.shard_count)
            .map(|_| {
                let (handle, metrics) = RegistryHandle::spawn_with_metrics(
                    config.clone(),
                    store.clone(),
                    notifier.clone(),
                )?;
                Ok(Shard { handle, metrics })
            })
            .collect::<Result<Vec<_>, RealtimeError>>()?;

        info!(
            shards = shards.len(),
            max_connections = config.max_connections,
            "Hub manager started"
        );

        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index that owns `session_id`.
    pub fn shard_index(&self, session_id: &str) -> usize {
        shard_index(session_id, self.shards.len())
    }

    /// Registry that owns `session_id`.
    pub fn shard_for(&self, session_id: &str) -> &RegistryHandle {
        &self.shards[self.shard_index(session_id)].handle
    }

    /// Admit a participant on the shard owning its session.
    pub async fn connect(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<Connection, RealtimeError> {
        self.shard_for(session_id)
            .connect(session_id, participant_id)
            .await
    }

    /// Broadcast an assistant reply to a session.
    pub async fn send_ai_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<(), RealtimeError> {
        self.shard_for(session_id)
            .send_ai_message(session_id, content)
            .await
    }

    /// Counters summed over every shard.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        for shard in &self.shards {
            total.merge(&shard.metrics.snapshot());
        }
        total
    }

    /// Counters of each shard, in shard order.
    pub fn shard_metrics(&self) -> Vec<MetricsSnapshot> {
        self.shards.iter().map(|s| s.metrics.snapshot()).collect()
    }

    /// Membership counts summed over every running shard.
    pub async fn stats(&self) -> RegistryStats {
        self.probe_shards().await.0
    }

    /// Summed membership counts and the number of shards that answered.
    pub async fn probe_shards(&self) -> (RegistryStats, usize) {
        let mut total = RegistryStats::default();
        let mut responding = 0;
        for (index, shard) in self.shards.iter().enumerate() {
            match shard.handle.stats().await {
                Ok(stats) => {
                    total.sessions += stats.sessions;
                    total.connections += stats.connections;
                    responding += 1;
                }
                Err(e) => warn!(shard = index, error = %e, "Shard stats unavailable"),
            }
        }
        (total, responding)
    }

    /// Shut down every shard. Shards already stopped are skipped.
    pub async fn shutdown(&self) {
        for (index, shard) in self.shards.iter().enumerate() {
            if let Err(e) = shard.handle.shutdown().await {
                warn!(shard = index, error = %e, "Shard already stopped");
            }
        }
        info!("Hub manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Frame;
    use crate::envelope::{Envelope, EnvelopeKind, AI_SENDER_ID};
    use crate::store::InMemoryStore;
    use futures::channel::mpsc::unbounded;
    use futures::StreamExt;
    use std::collections::HashSet;
    use std::convert::Infallible;

    fn start(shard_count: usize) -> HubManager {
        HubManager::start(
            HubConfig {
                shard_count,
                ..Default::default()
            },
            Arc::new(InMemoryStore::new()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_shard_index_is_deterministic() {
        for session in ["s1", "session-42", "", "äöü"] {
            assert_eq!(shard_index(session, 4), shard_index(session, 4));
        }
    }

    #[test]
    fn test_shard_index_in_range() {
        for i in 0..1000 {
            let session = format!("session-{}", i);
            assert!(shard_index(&session, 4) < 4);
            assert_eq!(shard_index(&session, 1), 0);
        }
    }

    #[test]
    fn test_shard_index_zero_shards_does_not_panic() {
        assert_eq!(shard_index("s1", 0), 0);
    }

    #[test]
    fn test_shard_index_spreads_sessions() {
        let used: HashSet<usize> = (0..200)
            .map(|i| shard_index(&format!("session-{}", i), 4))
            .collect();
        assert_eq!(used.len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = HubManager::start(
            HubConfig {
                shard_count: 0,
                ..Default::default()
            },
            Arc::new(InMemoryStore::new()),
            None,
        );
        assert!(matches!(result, Err(RealtimeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_routes_to_owning_shard() {
        let manager = start(4);
        let session = "session-7";

        let _connection = manager.connect(session, "alice").await.unwrap();

        let owner = manager.shard_index(session);
        for index in 0..manager.shard_count() {
            let connections = manager.shards[index].handle.stats().await.unwrap().connections;
            assert_eq!(connections, usize::from(index == owner));
        }
    }

    #[tokio::test]
    async fn test_stats_and_metrics_aggregate() {
        let manager = start(4);
        let mut connections = Vec::new();
        for i in 0..8 {
            let session = format!("session-{}", i);
            connections.push(manager.connect(&session, "alice").await.unwrap());
        }

        let stats = manager.stats().await;
        assert_eq!(stats.connections, 8);
        assert_eq!(stats.sessions, 8);

        let metrics = manager.metrics();
        assert_eq!(metrics.total_connects, 8);
        assert_eq!(metrics.active_connects, 8);
        let per_shard: u64 = manager
            .shard_metrics()
            .iter()
            .map(|m| m.active_connects)
            .sum();
        assert_eq!(per_shard, 8);
    }

    #[tokio::test]
    async fn test_ai_message_reaches_session() {
        let manager = start(4);
        let connection = manager.connect("s1", "alice").await.unwrap();
        let (sink, mut outbound) = unbounded::<Frame>();
        let (_inbound, stream) = unbounded::<Result<Frame, Infallible>>();
        tokio::spawn(connection.run(sink, stream));

        manager.send_ai_message("s1", "Hello from the assistant").await.unwrap();

        match outbound.next().await {
            Some(Frame::Text(text)) => {
                let envelope: Envelope = serde_json::from_str(&text).unwrap();
                assert_eq!(envelope.kind, EnvelopeKind::Message);
                assert_eq!(envelope.sender_id, AI_SENDER_ID);
                assert_eq!(envelope.content, "Hello from the assistant");
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_shard() {
        let manager = start(2);
        let _connection = manager.connect("s1", "alice").await.unwrap();

        manager.shutdown().await;

        assert_eq!(manager.metrics().active_connects, 0);
        assert_eq!(
            manager.probe_shards().await,
            (RegistryStats::default(), 0)
        );
        assert!(matches!(
            manager.connect("s1", "bob").await,
            Err(RealtimeError::RegistryClosed)
        ));
        // Second shutdown is a no-op.
        manager.shutdown().await;
    }
}
