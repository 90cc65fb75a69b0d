use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Identity of a shard: its index and the total shard count it was computed
/// against. `id` is always in `[0, total)`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct ShardId {
    pub id: u32,
    pub total: u32,
}

impl ShardId {
    pub const fn new(id: u32, total: u32) -> Self {
        Self { id, total }
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.id, self.total)
    }
}

/// Lifecycle state of a single shard runner.
///
/// See the gateway session state machine for the finer-grained states a
/// shard passes through while connecting; this is the coarser status
/// reported to peers and operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Reconnecting,
    Failed,
}

impl Default for ShardStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Display for ShardStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        })
    }
}

/// A point-in-time snapshot of one shard's health, as reported by a
/// [`ShardManager`](https://docs.rs/shardline-gateway) and carried over the
/// wire inside [`crate::coordination::WorkerMetrics`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: u32,
    pub status: ShardStatus,
    pub latency_ms: Option<u64>,
    pub events_per_sec: f64,
    pub commands_per_sec: f64,
    pub guild_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_id_formats_as_pair() {
        assert_eq!(ShardId::new(1, 4).to_string(), "1/4");
    }

    #[test]
    fn shard_status_round_trips() {
        for status in [
            ShardStatus::Disconnected,
            ShardStatus::Connecting,
            ShardStatus::Connected,
            ShardStatus::Ready,
            ShardStatus::Reconnecting,
            ShardStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: ShardStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
    }
}
