//! Connection and delivery counters attached to a registry through hooks.

use crate::client::Client;
use crate::envelope::Envelope;
use crate::registry::{DisconnectReason, RegistryHooks};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time copy of the hub counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Connections registered since start.
    pub total_connects: u64,
    /// Connections currently registered.
    pub active_connects: u64,
    /// Envelopes delivered to member queues by broadcasts.
    pub messages_sent: u64,
    /// Connections removed since start.
    pub disconnects: u64,
    /// Time of the most recent registration.
    pub last_connect: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Fold another shard's counters into this one.
    pub fn merge(&mut self, other: &MetricsSnapshot) {
        self.total_connects += other.total_connects;
        self.active_connects += other.active_connects;
        self.messages_sent += other.messages_sent;
        self.disconnects += other.disconnects;
        self.last_connect = match (self.last_connect, other.last_connect) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Hub counters guarded by their own lock, independent of membership.
#[derive(Debug, Default)]
pub struct HubMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }
}

impl RegistryHooks for HubMetrics {
    fn on_register(&self, _client: &Client) {
        let mut m = self.inner.lock();
        m.total_connects += 1;
        m.active_connects += 1;
        m.last_connect = Some(Utc::now());
    }

    fn on_unregister(&self, _client: &Client, _reason: DisconnectReason) {
        let mut m = self.inner.lock();
        m.active_connects = m.active_connects.saturating_sub(1);
        m.disconnects += 1;
    }

    fn on_broadcast(&self, _envelope: &Envelope, delivered: usize) {
        self.inner.lock().messages_sent += delivered as u64;
    }

    fn on_shutdown(&self) {
        self.inner.lock().active_connects = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister_restores_active() {
        let metrics = HubMetrics::new();
        let client = Client::new("s1", "alice");

        let before = metrics.snapshot().active_connects;
        metrics.on_register(&client);
        metrics.on_unregister(&client, DisconnectReason::Closed);

        let after = metrics.snapshot();
        assert_eq!(after.active_connects, before);
        assert_eq!(after.total_connects, 1);
        assert_eq!(after.disconnects, 1);
        assert!(after.last_connect.is_some());
    }

    #[test]
    fn test_active_never_underflows() {
        let metrics = HubMetrics::new();
        metrics.on_unregister(&Client::new("s1", "alice"), DisconnectReason::Liveness);
        assert_eq!(metrics.snapshot().active_connects, 0);
    }

    #[test]
    fn test_broadcast_counts_deliveries() {
        let metrics = HubMetrics::new();
        metrics.on_broadcast(&Envelope::message("s1", "alice", "hi"), 3);
        metrics.on_broadcast(&Envelope::message("s1", "alice", "again"), 0);
        assert_eq!(metrics.snapshot().messages_sent, 3);
    }

    #[test]
    fn test_shutdown_resets_active() {
        let metrics = HubMetrics::new();
        metrics.on_register(&Client::new("s1", "alice"));
        metrics.on_register(&Client::new("s1", "bob"));
        metrics.on_shutdown();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connects, 0);
        assert_eq!(snapshot.total_connects, 2);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let metrics = HubMetrics::new();
        let snapshot = metrics.snapshot();
        metrics.on_register(&Client::new("s1", "alice"));
        assert_eq!(snapshot.total_connects, 0);
    }

    #[test]
    fn test_merge() {
        let mut total = MetricsSnapshot::default();
        let shard = MetricsSnapshot {
            total_connects: 2,
            active_connects: 1,
            messages_sent: 5,
            disconnects: 1,
            last_connect: Some(Utc::now()),
        };
        total.merge(&shard);
        total.merge(&shard);
        assert_eq!(total.total_connects, 4);
        assert_eq!(total.messages_sent, 10);
        assert_eq!(total.last_connect, shard.last_connect);
    }
}
