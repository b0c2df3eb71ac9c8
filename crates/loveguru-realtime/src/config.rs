//! Hub configuration.

use crate::error::RealtimeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by every registry shard and connection loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubConfig {
    /// Number of independent registry shards.
    pub shard_count: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Capacity of each registry's command channel.
    pub command_capacity: usize,
    /// Maximum concurrent connections per shard.
    pub max_connections: usize,
    /// Upper bound for a single socket write.
    pub write_timeout_secs: u64,
    /// Keepalive ping period when no frame was written.
    pub keepalive_interval_secs: u64,
    /// Time a connection has to answer a liveness probe.
    pub probe_timeout_secs: u64,
    /// Period of the registry health sweep.
    pub sweep_interval_secs: u64,
    /// Inactivity after which a typing indicator is cleared.
    pub typing_idle_timeout_ms: u64,
    /// Number of persisted messages replayed to a new connection.
    pub history_limit: usize,
    /// Upper bound for the history replay.
    pub replay_timeout_secs: u64,
    /// Browser origins admitted to the WebSocket endpoint.
    pub allowed_origins: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            outbound_capacity: 256,
            command_capacity: 1024,
            max_connections: 10_000,
            write_timeout_secs: 10,
            keepalive_interval_secs: 54,
            probe_timeout_secs: 5,
            sweep_interval_secs: 60,
            typing_idle_timeout_ms: 3_000,
            history_limit: 50,
            replay_timeout_secs: 5,
            allowed_origins: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Check the configuration for values the hub cannot run with.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        let positive = [
            ("shard_count", self.shard_count as u64),
            ("outbound_capacity", self.outbound_capacity as u64),
            ("command_capacity", self.command_capacity as u64),
            ("max_connections", self.max_connections as u64),
            ("write_timeout_secs", self.write_timeout_secs),
            ("keepalive_interval_secs", self.keepalive_interval_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("typing_idle_timeout_ms", self.typing_idle_timeout_ms),
            ("replay_timeout_secs", self.replay_timeout_secs),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(RealtimeError::InvalidConfig(format!(
                "{} must be greater than zero",
                name
            )));
        }

        if self.keepalive_interval_secs >= self.sweep_interval_secs.saturating_mul(2) {
            return Err(RealtimeError::InvalidConfig(
                "keepalive_interval_secs must be shorter than two sweep intervals".to_string(),
            ));
        }

        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn typing_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_idle_timeout_ms)
    }

    pub fn replay_timeout(&self) -> Duration {
        Duration::from_secs(self.replay_timeout_secs)
    }

    /// Origin policy built from `allowed_origins`.
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::new(self.allowed_origins.clone())
    }
}

/// Decides which browser origins may open a chat socket.
///
/// An empty list rejects every request that carries an `Origin` header.
/// Requests without the header come from native clients and are admitted.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Create a policy from a list of origins; `"*"` admits everything.
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed: allowed.iter().map(|o| normalize_origin(o)).collect(),
        }
    }

    /// Check the value of a request's `Origin` header.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        let origin = normalize_origin(origin);
        self.allowed.iter().any(|a| a == "*" || *a == origin)
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
