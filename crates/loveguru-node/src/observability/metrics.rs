//! Prometheus export of hub metrics.
//!
//! The hub keeps its own counters; every scrape copies the latest snapshot
//! into the prometheus-client registry.

use loveguru_realtime::{MetricsSnapshot, RegistryStats};
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Per-shard labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ShardLabels {
    /// Shard index.
    pub shard: String,
}

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// Connections currently registered, all shards.
    pub connections_active: Gauge,
    /// Sessions with at least one connection.
    pub sessions_active: Gauge,
    /// Connections currently registered, per shard.
    pub shard_connections_active: Family<ShardLabels, Gauge>,
    /// Connections registered since start.
    pub connects_total: Counter,
    /// Connections removed since start.
    pub disconnects_total: Counter,
    /// Envelopes delivered by broadcasts.
    pub messages_sent_total: Counter,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let connections_active = Gauge::default();
        registry.register(
            "loveguru_ws_connections_active",
            "Active WebSocket chat connections",
            connections_active.clone(),
        );

        let sessions_active = Gauge::default();
        registry.register(
            "loveguru_ws_sessions_active",
            "Chat sessions with at least one connection",
            sessions_active.clone(),
        );

        let shard_connections_active = Family::<ShardLabels, Gauge>::default();
        registry.register(
            "loveguru_ws_shard_connections_active",
            "Active WebSocket chat connections per shard",
            shard_connections_active.clone(),
        );

        // Counters get the `_total` suffix on export.
        let connects_total = Counter::default();
        registry.register(
            "loveguru_ws_connects",
            "WebSocket chat connections registered",
            connects_total.clone(),
        );

        let disconnects_total = Counter::default();
        registry.register(
            "loveguru_ws_disconnects",
            "WebSocket chat connections removed",
            disconnects_total.clone(),
        );

        let messages_sent_total = Counter::default();
        registry.register(
            "loveguru_ws_messages_sent",
            "Envelopes delivered to connection queues",
            messages_sent_total.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            connections_active,
            sessions_active,
            shard_connections_active,
            connects_total,
            disconnects_total,
            messages_sent_total,
        }
    }

    /// Copy hub counters into the exported metrics.
    pub fn refresh(
        &self,
        total: &MetricsSnapshot,
        shards: &[MetricsSnapshot],
        stats: RegistryStats,
    ) {
        self.connections_active.set(total.active_connects as i64);
        self.sessions_active.set(stats.sessions as i64);

        for (index, shard) in shards.iter().enumerate() {
            self.shard_connections_active
                .get_or_create(&ShardLabels {
                    shard: index.to_string(),
                })
                .set(shard.active_connects as i64);
        }

        advance(&self.connects_total, total.total_connects);
        advance(&self.disconnects_total, total.disconnects);
        advance(&self.messages_sent_total, total.messages_sent);
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

/// Move a monotonic counter up to `value`.
fn advance(counter: &Counter, value: u64) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}
