//! Wire types for the coordination protocol (§6.2): registration, metrics,
//! assignment, migration, succession, and coordinator resumption.
//!
//! All timestamps are Unix milliseconds and all process ids are opaque
//! strings, per the protocol's stated conventions.

use crate::shard::ShardInfo;
use serde::{Deserialize, Serialize};

/// What a worker tells the coordinator about itself on `POST /register`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerRegistration {
    pub process_id: String,
    pub url: String,
    #[serde(default)]
    pub max_shards: Option<u32>,
    pub capabilities: WorkerCapabilities,
}

/// Hardware/runtime facts collected at worker startup, sent once at
/// registration time for observability.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerCapabilities {
    pub memory_mb: u64,
    pub cores: u32,
    pub platform: String,
}

/// One row of the succession list, as carried over the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuccessionEntryWire {
    pub position: u32,
    pub process_id: String,
    pub url: String,
    pub is_original_coordinator: bool,
}

/// Response to a successful `POST /register`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerRegistrationResponse {
    pub assigned_shards: Vec<u32>,
    pub total_shards: u32,
    pub succession: Vec<SuccessionEntryWire>,
    pub coordinator_id: String,
}

/// Coarse health classification a worker self-reports alongside its
/// metrics. Not prescribed in detail by the protocol beyond being present;
/// the thresholds used to derive it are a worker-local decision (see
/// DESIGN.md).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthLabel {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A worker's full metrics snapshot, replaced wholesale on every
/// `POST /metrics`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerMetrics {
    pub process_id: String,
    pub timestamp: u64,
    pub cpu_usage: f64,
    pub memory_mb: u64,
    pub shards: Vec<ShardInfo>,
    pub health_label: HealthLabel,
}

/// `POST /assignment`: tells a worker to start runners for newly-assigned
/// shards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShardAssignment {
    pub shards: Vec<u32>,
    pub reason: String,
    pub timestamp: u64,
}

/// `POST /migrate`: tells the worker named `from_node` to detach one shard,
/// which is being handed to `to_node`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShardMigrationRequest {
    pub shard_id: u32,
    pub from_node: String,
    pub to_node: String,
    pub reason: String,
    pub timestamp: u64,
}

/// `POST /succession`: a broadcast replacement of the whole succession list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SuccessionUpdate {
    pub succession: Vec<SuccessionEntryWire>,
    #[serde(default)]
    pub removed_node: Option<String>,
    #[serde(default)]
    pub added_node: Option<String>,
    pub timestamp: u64,
}

/// A recovering original coordinator's request for a handoff, sent to
/// whichever node currently holds position 1.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorResumptionRequest {
    pub original_coordinator_id: String,
    pub original_coordinator_url: String,
    pub timestamp: u64,
}

/// Snapshot of one peer, as carried inside a [`CoordinatorHandoffData`] or
/// returned from `GET /cluster`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerSnapshot {
    pub process_id: String,
    pub url: String,
    pub assigned_shards: Vec<u32>,
    #[serde(default)]
    pub max_shards: Option<u32>,
    pub last_heartbeat: u64,
    #[serde(default)]
    pub metrics: Option<WorkerMetrics>,
}

/// Everything a temporary coordinator hands back to a recovering original
/// coordinator so it can resume authoritative state without any peer
/// re-registering.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorHandoffData {
    pub total_shards: u32,
    pub peers: Vec<PeerSnapshot>,
    pub succession: Vec<SuccessionEntryWire>,
}

/// `POST /coordinator/resumed`: broadcast by the original coordinator after
/// it has reclaimed position 1, telling every worker to re-register against
/// its URL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorResumedAnnouncement {
    pub new_coordinator_url: String,
    pub timestamp: u64,
}

/// `GET /cluster` response: the coordinator's whole-fleet view.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClusterState {
    pub total_shards: u32,
    pub coordinator_id: String,
    pub peers: Vec<PeerSnapshot>,
}

/// `GET /health` response, served by every node regardless of role.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub shards: Vec<ShardInfo>,
    pub is_coordinator: bool,
    pub timestamp: u64,
}

/// Body of every 400-class error response from the coordination server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trips<T>(value: &T)
    where
        T: Serialize + for<'de> Deserialize<'de> + PartialEq + std::fmt::Debug,
    {
        let json = serde_json::to_string(value).unwrap();
        let back: T = serde_json::from_str(&json).unwrap();
        assert_eq!(value, &back);
    }

    #[test]
    fn worker_registration_round_trips() {
        round_trips(&WorkerRegistration {
            process_id: "w1".into(),
            url: "http://127.0.0.1:9000".into(),
            max_shards: Some(8),
            capabilities: WorkerCapabilities { memory_mb: 512, cores: 4, platform: "linux".into() },
        });
    }

    #[test]
    fn succession_update_round_trips_with_optionals_absent() {
        round_trips(&SuccessionUpdate {
            succession: vec![SuccessionEntryWire {
                position: 1,
                process_id: "w1".into(),
                url: "http://a".into(),
                is_original_coordinator: true,
            }],
            removed_node: None,
            added_node: None,
            timestamp: 1000,
        });
    }

    #[test]
    fn error_response_shape() {
        let err = ErrorResponse::new("bad request");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "bad request");
    }
}
