//! The coordinator role (§4.5): registration, shard assignment, metrics
//! ingestion, health sweeps, load balancing, and original-coordinator
//! resumption.

use crate::{
    client::CoordinationClient,
    error::{Error, Result},
    health_monitor, load_balancer,
    peer_registry::PeerRegistry,
    succession::SuccessionList,
};
use shardline_model::{
    ClusterState, CoordinatorHandoffData, CoordinatorResumptionRequest, ShardAssignment, ShardMigrationRequest, SuccessionUpdate,
    WorkerMetrics, WorkerRegistration, WorkerRegistrationResponse,
};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex, PoisonError,
};

/// Drives the coordinator side of the protocol. Constructed whenever a node
/// starts (or is promoted) into the coordinator role; dropped (via
/// [`Coordinator::shutdown`]) when it steps down.
#[derive(Debug)]
pub struct Coordinator {
    pub process_id: String,
    pub url: String,
    pub is_original_coordinator: bool,
    total_shards: AtomicU32,
    registry: Arc<PeerRegistry>,
    succession: Arc<SuccessionList>,
    client: CoordinationClient,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Coordinator {
    /// `succession` is shared with the node's [`crate::worker::Worker`] so
    /// that a promoted worker inherits the list it already had cached,
    /// rather than starting from an empty one.
    pub fn new(
        process_id: impl Into<String>,
        url: impl Into<String>,
        is_original_coordinator: bool,
        total_shards: u32,
        client: CoordinationClient,
        succession: Arc<SuccessionList>,
    ) -> Arc<Self> {
        Arc::new(Self {
            process_id: process_id.into(),
            url: url.into(),
            is_original_coordinator,
            total_shards: AtomicU32::new(total_shards),
            registry: Arc::new(PeerRegistry::new()),
            succession,
            client,
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn total_shards(&self) -> u32 {
        self.total_shards.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Starts the periodic health and load-balancing sweeps. Call once,
    /// right after construction or promotion.
    pub fn start(self: &Arc<Self>) {
        let for_health = Arc::clone(self);
        let health = health_monitor::spawn(move || {
            let coordinator = Arc::clone(&for_health);
            async move { coordinator.run_health_check(now_ms()).await }
        });

        let for_balance = Arc::clone(self);
        let balance = load_balancer::spawn(move || {
            let coordinator = Arc::clone(&for_balance);
            async move { coordinator.run_load_balance(now_ms()).await }
        });

        self.background.lock().unwrap_or_else(PoisonError::into_inner).extend([health, balance]);
    }

    /// Seeds the registry with this node's own shards, used right after a
    /// promotion so `/cluster` reflects the coordinator's own load
    /// immediately instead of waiting for its first self-reported metrics.
    pub fn seed_self(&self, assigned_shards: &[u32], now: u64) {
        self.registry.upsert(self.process_id.clone(), self.url.clone(), None, now);
        for &shard in assigned_shards {
            let _ = self.registry.assign(&self.process_id, shard);
        }
    }

    pub async fn register(&self, registration: WorkerRegistration, now: u64) -> WorkerRegistrationResponse {
        let worker_id = registration.process_id.clone();
        self.registry.upsert(registration.process_id.clone(), registration.url.clone(), registration.max_shards, now);
        self.succession.add(registration.process_id.clone(), registration.url.clone(), false);

        let assigned = self.assign_to_new_worker(&registration.process_id);

        self.broadcast_succession(Some(worker_id), None, now).await;

        WorkerRegistrationResponse {
            assigned_shards: assigned,
            total_shards: self.total_shards(),
            succession: self.succession.snapshot().into_iter().map(Into::into).collect(),
            coordinator_id: self.process_id.clone(),
        }
    }

    /// §4.5.1: hand out the lowest unassigned shard id; if every shard is
    /// already assigned, steal the new worker one shard from whichever
    /// worker currently holds the most.
    fn assign_to_new_worker(&self, process_id: &str) -> Vec<u32> {
        let assigned_elsewhere = self.registry.all_assigned_shards();

        if let Some(shard) = (0..self.total_shards()).find(|id| !assigned_elsewhere.contains(id)) {
            let _ = self.registry.assign(process_id, shard);
            return vec![shard];
        }

        let Some(donor) = self.registry.worker_with_most_shards_excluding(process_id) else {
            return Vec::new();
        };
        let Some(shard) = self.registry.assigned_shards_of(&donor).into_iter().min() else {
            return Vec::new();
        };

        let _ = self.registry.unassign(&donor, shard);
        let _ = self.registry.assign(process_id, shard);
        vec![shard]
    }

    pub fn metrics(&self, metrics: WorkerMetrics, now: u64) -> Result<()> {
        self.registry.record_metrics(metrics, now)
    }

    pub fn cluster_state(&self) -> ClusterState {
        ClusterState { total_shards: self.total_shards(), coordinator_id: self.process_id.clone(), peers: self.registry.snapshot() }
    }

    /// §4.5 HealthMonitor tick: evict unreachable peers, hand their shards
    /// to the survivors round-robin, broadcast the new succession.
    pub async fn run_health_check(&self, now: u64) {
        let dead = self.registry.dead_peers(now);
        if dead.is_empty() {
            return;
        }

        let mut orphaned_shards = Vec::new();
        for process_id in &dead {
            if let Some(shards) = self.registry.remove(process_id) {
                orphaned_shards.extend(shards);
            }
            self.succession.remove(process_id);
            tracing::warn!(process_id, "peer missed its heartbeat deadline; evicted");
        }

        orphaned_shards.sort_unstable();
        self.redistribute_round_robin(orphaned_shards);
        self.broadcast_succession(None, dead.into_iter().next(), now).await;
    }

    fn redistribute_round_robin(&self, shards: Vec<u32>) {
        let healthy = self.registry.process_ids();
        if healthy.is_empty() {
            tracing::error!("no healthy workers remain to absorb orphaned shards");
            return;
        }
        for (index, shard) in shards.into_iter().enumerate() {
            let target = &healthy[index % healthy.len()];
            let _ = self.registry.assign(target, shard);
        }
    }

    async fn broadcast_succession(&self, added: Option<String>, removed: Option<String>, now: u64) {
        let update = SuccessionUpdate {
            succession: self.succession.snapshot().into_iter().map(Into::into).collect(),
            removed_node: removed,
            added_node: added,
            timestamp: now,
        };

        for process_id in self.registry.process_ids() {
            let Some(url) = self.registry.url_of(&process_id) else { continue };
            if let Err(error) = self.client.send_succession(&url, &update).await {
                tracing::warn!(process_id, %error, "failed to deliver succession broadcast");
            }
        }
    }

    /// §4.5 LoadBalancer tick: migrate at most one shard per overloaded
    /// worker, to the first round-robin-eligible candidate.
    pub async fn run_load_balance(&self, now: u64) {
        let peers = self.registry.snapshot();
        let total_workers = peers.len();

        for peer in &peers {
            let Some(metrics) = &peer.metrics else { continue };
            let latencies: Vec<Option<u64>> = metrics.shards.iter().map(|shard| shard.latency_ms).collect();

            if !load_balancer::is_overloaded(metrics.cpu_usage, &latencies, peer.assigned_shards.len()) {
                continue;
            }
            let Some(shard_id) = load_balancer::worst_shard(&metrics.shards) else { continue };

            let target = peers.iter().filter(|candidate| candidate.process_id != peer.process_id).find(|candidate| {
                let cpu = candidate.metrics.as_ref().map_or(0.0, |m| m.cpu_usage);
                load_balancer::is_candidate(cpu, candidate.assigned_shards.len(), total_workers)
            });

            let Some(target) = target else { continue };
            self.migrate(&peer.process_id, &target.process_id, shard_id, now).await;
        }
    }

    /// The commit only takes effect once the target acknowledges the
    /// assignment; an unreachable target aborts the migration entirely
    /// rather than leaving the shard double-assigned.
    async fn migrate(&self, from: &str, to: &str, shard_id: u32, now: u64) {
        let reason = "load_balance".to_owned();

        let Some(target_url) = self.registry.url_of(to) else { return };
        let assignment = ShardAssignment { shards: vec![shard_id], reason: reason.clone(), timestamp: now };
        if let Err(error) = self.client.send_assignment(&target_url, &assignment).await {
            tracing::warn!(to, %error, "migration target rejected assignment; aborting migration");
            return;
        }

        let _ = self.registry.unassign(from, shard_id);
        let _ = self.registry.assign(to, shard_id);

        if let Some(url) = self.registry.url_of(from) {
            let request = ShardMigrationRequest { shard_id, from_node: from.to_owned(), to_node: to.to_owned(), reason, timestamp: now };
            if let Err(error) = self.client.send_migration(&url, &request).await {
                tracing::warn!(from, %error, "failed to notify migration source");
            }
        }
    }

    /// `POST /coordinator/resume`: only valid against a *temporary*
    /// coordinator. An original coordinator calling this on itself is a
    /// role mismatch (§6.2 error list).
    pub fn resume(&self, request: &CoordinatorResumptionRequest) -> Result<CoordinatorHandoffData> {
        if self.is_original_coordinator {
            return Err(Error::role_mismatch("a non-original (temporary) coordinator"));
        }

        let handoff = CoordinatorHandoffData {
            total_shards: self.total_shards(),
            peers: self.registry.snapshot(),
            succession: self.succession.snapshot().into_iter().map(Into::into).collect(),
        };

        tracing::info!(
            original_coordinator = %request.original_coordinator_id,
            "stepping down: original coordinator is resuming",
        );
        self.shutdown();

        Ok(handoff)
    }

    /// Aborts the background sweeps. After this, the coordinator no longer
    /// drives health/balance ticks but its accessor methods remain valid
    /// for inspection.
    pub fn shutdown(&self) {
        let mut tasks = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_model::WorkerCapabilities;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Coordinator: Send, Sync, std::fmt::Debug);

    fn registration(id: &str, url: &str) -> WorkerRegistration {
        WorkerRegistration {
            process_id: id.to_owned(),
            url: url.to_owned(),
            max_shards: None,
            capabilities: WorkerCapabilities { memory_mb: 512, cores: 2, platform: "linux".into() },
        }
    }

    #[tokio::test]
    async fn scenario_s5_registration_assignment() {
        let coordinator = Coordinator::new("coord", "http://coord", false, 4, CoordinationClient::new(), Arc::new(SuccessionList::new()));

        let r1 = coordinator.register(registration("w1", "http://w1"), 0).await;
        assert_eq!(r1.assigned_shards, vec![0]);

        let r2 = coordinator.register(registration("w2", "http://w2"), 0).await;
        assert_eq!(r2.assigned_shards, vec![1]);
        let r3 = coordinator.register(registration("w3", "http://w3"), 0).await;
        assert_eq!(r3.assigned_shards, vec![2]);
        let r4 = coordinator.register(registration("w4", "http://w4"), 0).await;
        assert_eq!(r4.assigned_shards, vec![3]);

        let r5 = coordinator.register(registration("w5", "http://w5"), 0).await;
        assert_eq!(r5.assigned_shards.len(), 1);

        let all = coordinator.registry.all_assigned_shards();
        let mut sorted = all.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn resuming_onto_an_original_coordinator_is_a_role_mismatch() {
        let coordinator = Coordinator::new("coord", "http://coord", true, 1, CoordinationClient::new(), Arc::new(SuccessionList::new()));
        let request = CoordinatorResumptionRequest { original_coordinator_id: "other".into(), original_coordinator_url: "http://other".into(), timestamp: 0 };
        let error = coordinator.resume(&request).unwrap_err();
        assert!(matches!(error.kind(), crate::error::ErrorType::RoleMismatch { .. }));
    }

    #[tokio::test]
    async fn resume_returns_a_full_handoff_and_steps_down() {
        let coordinator = Coordinator::new("coord", "http://coord", false, 4, CoordinationClient::new(), Arc::new(SuccessionList::new()));
        coordinator.register(registration("w1", "http://w1"), 0).await;

        let request = CoordinatorResumptionRequest { original_coordinator_id: "orig".into(), original_coordinator_url: "http://orig".into(), timestamp: 0 };
        let handoff = coordinator.resume(&request).unwrap();
        assert_eq!(handoff.total_shards, 4);
        assert_eq!(handoff.peers.len(), 1);
    }

    #[tokio::test]
    async fn scenario_s6_failover_redistributes_and_compacts_succession() {
        let coordinator = Coordinator::new("coord", "http://coord", false, 4, CoordinationClient::new(), Arc::new(SuccessionList::new()));
        coordinator.register(registration("w1", "http://w1"), 0).await;
        coordinator.register(registration("w2", "http://w2"), 0).await;
        coordinator.register(registration("w3", "http://w3"), 0).await;
        coordinator.register(registration("w4", "http://w4"), 0).await;

        // w2 goes quiet; every other peer is still fresh at t=20_000.
        coordinator.registry.upsert("w1".into(), "http://w1".into(), None, 20_000);
        coordinator.registry.assign("w1", 0).unwrap();
        coordinator.registry.upsert("w3".into(), "http://w3".into(), None, 20_000);
        coordinator.registry.assign("w3", 2).unwrap();
        coordinator.registry.upsert("w4".into(), "http://w4".into(), None, 20_000);
        coordinator.registry.assign("w4", 3).unwrap();

        coordinator.run_health_check(20_000).await;

        assert!(!coordinator.registry.contains("w2"));
        assert_eq!(coordinator.registry.assigned_shards_of("w2"), Vec::<u32>::new());
        let mut remaining = coordinator.registry.all_assigned_shards();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![0, 1, 2, 3]);

        let positions: Vec<u32> = coordinator.succession.snapshot().iter().map(|entry| entry.position).collect();
        assert_eq!(positions, (1..=positions.len() as u32).collect::<Vec<_>>());
    }
}
