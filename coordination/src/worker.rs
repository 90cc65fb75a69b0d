//! The worker role (§4.6): registers with a coordinator, runs assigned
//! shards, reports metrics, and promotes itself when the coordinator goes
//! dark.

use crate::{
    client::CoordinationClient,
    coordinator::Coordinator,
    error::Result,
    succession::SuccessionList,
};
use shardline_gateway::{Dispatcher as ShardDispatcher, ManagerConfig, ShardManager};
use shardline_model::{
    CoordinatorHandoffData, CoordinatorResumedAnnouncement, CoordinatorResumptionRequest, DispatchEvent, HealthLabel,
    HealthResponse, Intents, ShardAssignment, ShardInfo, ShardMigrationRequest, SuccessionUpdate, WorkerCapabilities,
    WorkerMetrics, WorkerRegistration,
};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

/// Consecutive failed `/health` probes against the coordinator before a
/// position-1 worker promotes itself. Per the design notes' open question,
/// this is the sole promotion criterion (no other signal is consulted).
pub const PROMOTION_FAILURE_THRESHOLD: u32 = 3;
pub const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(5);
pub const METRICS_PUSH_INTERVAL: Duration = Duration::from_secs(5);
const RESUMPTION_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Samples local resource usage for the metrics push. Pluggable because the
/// sampling mechanism is OS-specific and outside this protocol's concern;
/// [`DefaultResourceSampler`] is a conservative placeholder.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> (f64, u64);
}

/// Reports zero CPU usage and the capabilities-declared memory figure.
/// Replace with a real sampler (e.g. one backed by `/proc` or a platform
/// crate) in a production deployment.
pub struct DefaultResourceSampler {
    memory_mb: u64,
}

impl ResourceSampler for DefaultResourceSampler {
    fn sample(&self) -> (f64, u64) {
        (0.0, self.memory_mb)
    }
}

fn classify_health(cpu_usage: f64) -> HealthLabel {
    if cpu_usage > 0.80 {
        HealthLabel::Unhealthy
    } else if cpu_usage > 0.60 {
        HealthLabel::Degraded
    } else {
        HealthLabel::Healthy
    }
}

pub struct Worker {
    pub process_id: String,
    pub url: String,
    pub is_original_coordinator: bool,
    token: String,
    intents: Intents,
    capabilities: WorkerCapabilities,
    client: CoordinationClient,
    sampler: Box<dyn ResourceSampler>,
    event_sink: Arc<dyn Fn(u32, DispatchEvent) + Send + Sync>,
    manager: Mutex<Option<ShardManager>>,
    total_shards: AtomicU32,
    coordinator_id: Mutex<String>,
    coordinator_url: Mutex<String>,
    succession: Arc<SuccessionList>,
    coordinator: Mutex<Option<Arc<Coordinator>>>,
    consecutive_health_failures: AtomicU32,
}

impl Debug for Worker {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Worker")
            .field("process_id", &self.process_id)
            .field("url", &self.url)
            .field("is_original_coordinator", &self.is_original_coordinator)
            .field("is_coordinator", &self.is_coordinator())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::too_many_arguments)]
impl Worker {
    pub fn new(
        process_id: impl Into<String>,
        url: impl Into<String>,
        token: impl Into<String>,
        intents: Intents,
        capabilities: WorkerCapabilities,
        coordinator_url: impl Into<String>,
        is_original_coordinator: bool,
        event_sink: Arc<dyn Fn(u32, DispatchEvent) + Send + Sync>,
        client: CoordinationClient,
    ) -> Arc<Self> {
        let coordinator_url = coordinator_url.into();
        let sampler = Box::new(DefaultResourceSampler { memory_mb: capabilities.memory_mb });

        Arc::new(Self {
            process_id: process_id.into(),
            url: url.into(),
            is_original_coordinator,
            token: token.into(),
            intents,
            capabilities,
            client,
            sampler,
            event_sink,
            manager: Mutex::new(None),
            total_shards: AtomicU32::new(1),
            coordinator_id: Mutex::new(String::new()),
            coordinator_url: Mutex::new(coordinator_url),
            succession: Arc::new(SuccessionList::new()),
            coordinator: Mutex::new(None),
            consecutive_health_failures: AtomicU32::new(0),
        })
    }

    pub fn coordinator_url(&self) -> String {
        self.coordinator_url.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn coordinator_id(&self) -> String {
        self.coordinator_id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn total_shards(&self) -> u32 {
        self.total_shards.load(Ordering::Relaxed)
    }

    /// Registers with the configured coordinator URL and applies the
    /// response: starts any newly-assigned shards, caches total shard
    /// count and succession.
    pub async fn register(&self) -> Result<()> {
        let registration = WorkerRegistration {
            process_id: self.process_id.clone(),
            url: self.url.clone(),
            max_shards: None,
            capabilities: self.capabilities.clone(),
        };

        let response = self.client.register(&self.coordinator_url(), &registration).await?;
        self.apply_registration(response);
        Ok(())
    }

    fn apply_registration(&self, response: shardline_model::WorkerRegistrationResponse) {
        self.total_shards.store(response.total_shards, Ordering::Relaxed);
        *self.coordinator_id.lock().unwrap_or_else(PoisonError::into_inner) = response.coordinator_id;
        self.succession.load_from(response.succession.into_iter().map(Into::into).collect());

        for id in response.assigned_shards {
            self.start_shard(id);
        }
    }

    /// The very first node of a cluster: becomes coordinator directly,
    /// without registering over the network against itself.
    pub async fn bootstrap_as_coordinator(self: &Arc<Self>, total_shards: u32, now: u64) {
        let coordinator = Coordinator::new(
            self.process_id.clone(),
            self.url.clone(),
            self.is_original_coordinator,
            total_shards,
            self.client.clone(),
            Arc::clone(&self.succession),
        );
        coordinator.start();

        let registration = WorkerRegistration {
            process_id: self.process_id.clone(),
            url: self.url.clone(),
            max_shards: None,
            capabilities: self.capabilities.clone(),
        };
        let response = coordinator.register(registration, now).await;
        self.apply_registration(response);

        *self.coordinator.lock().unwrap_or_else(PoisonError::into_inner) = Some(coordinator);
    }

    fn ensure_manager(&self) -> ShardManager {
        let mut guard = self.manager.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .get_or_insert_with(|| ShardManager::new(ManagerConfig::new(self.token.clone(), self.intents, self.total_shards())))
            .clone()
    }

    fn start_shard(&self, id: u32) {
        let manager = self.ensure_manager();
        let sink = Arc::clone(&self.event_sink);
        let dispatcher: ShardDispatcher = Box::new(move |event| sink(id, event));
        let error_sink: shardline_gateway::ErrorSink = Arc::new(move |error| {
            tracing::error!(id, %error, "shard session reported a fatal error");
        });

        if let Err(error) = manager.start(id, dispatcher, error_sink) {
            tracing::warn!(id, %error, "failed to start shard runner");
        }
    }

    async fn stop_shard(&self, id: u32) {
        let manager = self.manager.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(manager) = manager {
            manager.stop(id).await;
        }
    }

    /// `POST /assignment`.
    pub fn handle_assignment(&self, assignment: ShardAssignment) {
        tracing::info!(reason = %assignment.reason, shards = ?assignment.shards, "received shard assignment");
        for id in assignment.shards {
            self.start_shard(id);
        }
    }

    /// `POST /migrate`. A no-op unless this worker is the named source.
    pub async fn handle_migration(&self, request: ShardMigrationRequest) {
        if request.from_node != self.process_id {
            return;
        }
        tracing::info!(shard_id = request.shard_id, to = %request.to_node, "migrating shard away");
        self.stop_shard(request.shard_id).await;
    }

    /// `POST /succession`.
    pub fn handle_succession(&self, update: SuccessionUpdate) {
        self.succession.load_from(update.succession.into_iter().map(Into::into).collect());
    }

    /// `POST /coordinator/resumed`: cache the new URL, wait out a small
    /// settle window, then re-register.
    pub async fn handle_resumed(&self, announcement: CoordinatorResumedAnnouncement) {
        *self.coordinator_url.lock().unwrap_or_else(PoisonError::into_inner) = announcement.new_coordinator_url;
        tokio::time::sleep(RESUMPTION_SETTLE_DELAY).await;
        if let Err(error) = self.register().await {
            tracing::warn!(%error, "re-registration after coordinator resumption failed");
        }
    }

    pub fn snapshot(&self) -> Vec<ShardInfo> {
        self.manager.lock().unwrap_or_else(PoisonError::into_inner).as_ref().map(ShardManager::snapshot).unwrap_or_default()
    }

    pub fn health_response(&self, now: u64) -> HealthResponse {
        HealthResponse { status: "ok".into(), shards: self.snapshot(), is_coordinator: self.is_coordinator(), timestamp: now }
    }

    /// `GET /coordinator/resume` handler delegate, if this node is
    /// currently the (temporary) coordinator.
    pub fn coordinator(&self) -> Option<Arc<Coordinator>> {
        self.coordinator.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Pushes this worker's metrics to the coordinator, or (if this node
    /// itself is coordinating) records them directly against its own
    /// registry.
    pub async fn push_metrics(&self, now: u64) -> Result<()> {
        let (cpu_usage, memory_mb) = self.sampler.sample();
        let metrics = WorkerMetrics {
            process_id: self.process_id.clone(),
            timestamp: now,
            cpu_usage,
            memory_mb,
            shards: self.snapshot(),
            health_label: classify_health(cpu_usage),
        };

        if let Some(coordinator) = self.coordinator() {
            return coordinator.metrics(metrics, now);
        }

        self.client.metrics(&self.coordinator_url(), &metrics).await
    }

    /// Probes the coordinator's `/health`; after [`PROMOTION_FAILURE_THRESHOLD`]
    /// consecutive failures, promotes or follows the succession list (§4.6).
    pub async fn probe_coordinator(self: &Arc<Self>) {
        if self.is_coordinator() {
            return;
        }

        match self.client.health(&self.coordinator_url()).await {
            Ok(_) => self.consecutive_health_failures.store(0, Ordering::Relaxed),
            Err(error) => {
                let failures = self.consecutive_health_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(%error, failures, "coordinator health probe failed");
                if failures >= PROMOTION_FAILURE_THRESHOLD {
                    self.consecutive_health_failures.store(0, Ordering::Relaxed);
                    self.handle_coordinator_unreachable().await;
                }
            }
        }
    }

    async fn handle_coordinator_unreachable(self: &Arc<Self>) {
        if self.succession.position_of(&self.process_id) == Some(1) {
            self.promote();
        } else {
            self.find_and_follow_reachable_coordinator().await;
        }
    }

    fn promote(self: &Arc<Self>) {
        if self.is_coordinator() {
            return;
        }

        let coordinator = Coordinator::new(
            self.process_id.clone(),
            self.url.clone(),
            self.is_original_coordinator,
            self.total_shards(),
            self.client.clone(),
            Arc::clone(&self.succession),
        );
        coordinator.start();

        let assigned = self.manager.lock().unwrap_or_else(PoisonError::into_inner).as_ref().map(ShardManager::running_ids).unwrap_or_default();
        coordinator.seed_self(&assigned, now_ms());

        *self.coordinator.lock().unwrap_or_else(PoisonError::into_inner) = Some(coordinator);
        tracing::warn!("coordinator unreachable; promoted self to temporary coordinator");
    }

    async fn find_and_follow_reachable_coordinator(&self) {
        for entry in self.succession.snapshot() {
            if entry.process_id == self.process_id {
                continue;
            }
            if self.client.health(&entry.url).await.is_ok() {
                *self.coordinator_url.lock().unwrap_or_else(PoisonError::into_inner) = entry.url.clone();
                *self.coordinator_id.lock().unwrap_or_else(PoisonError::into_inner) = entry.process_id.clone();
                if let Err(error) = self.register().await {
                    tracing::warn!(%error, "failed to re-register with newly discovered coordinator");
                }
                return;
            }
        }
        tracing::error!("no reachable coordinator found anywhere in the succession list");
    }

    /// The original-coordinator recovery path (§4.5 Resumption): ask
    /// whoever is coordinating now for a handoff, apply it, reclaim
    /// position 1, and announce the reclaimed role to every peer.
    pub async fn resume_as_original(self: &Arc<Self>) -> Result<()> {
        let url = self.coordinator_url();
        let request = CoordinatorResumptionRequest {
            original_coordinator_id: self.process_id.clone(),
            original_coordinator_url: self.url.clone(),
            timestamp: now_ms(),
        };

        let handoff = self.client.resume(&url, &request).await?;
        self.apply_handoff(handoff);

        let announcement = CoordinatorResumedAnnouncement { new_coordinator_url: self.url.clone(), timestamp: now_ms() };
        for peer_url in self.peer_urls_excluding_self() {
            if let Err(error) = self.client.resumed(&peer_url, &announcement).await {
                tracing::warn!(%error, peer_url, "failed to deliver resumption announcement");
            }
        }

        Ok(())
    }

    /// Applies a [`CoordinatorHandoffData`], whether received synchronously
    /// from [`Worker::resume_as_original`] or pushed later to
    /// `/coordinator/handoff`.
    pub fn apply_handoff(self: &Arc<Self>, data: CoordinatorHandoffData) {
        self.total_shards.store(data.total_shards, Ordering::Relaxed);
        self.succession.load_from(data.succession.into_iter().map(Into::into).collect());
        self.succession.promote_to_first(self.process_id.clone(), self.url.clone(), self.is_original_coordinator);

        let coordinator = Coordinator::new(
            self.process_id.clone(),
            self.url.clone(),
            self.is_original_coordinator,
            data.total_shards,
            self.client.clone(),
            Arc::clone(&self.succession),
        );
        for peer in &data.peers {
            coordinator.registry().upsert(peer.process_id.clone(), peer.url.clone(), peer.max_shards, peer.last_heartbeat);
            for &shard in &peer.assigned_shards {
                let _ = coordinator.registry().assign(&peer.process_id, shard);
            }
        }
        coordinator.start();

        *self.coordinator.lock().unwrap_or_else(PoisonError::into_inner) = Some(coordinator);
    }

    fn peer_urls_excluding_self(&self) -> Vec<String> {
        self.coordinator()
            .map(|coordinator| {
                coordinator.registry().snapshot().into_iter().filter(|peer| peer.process_id != self.process_id).map(|peer| peer.url).collect()
            })
            .unwrap_or_default()
    }

    pub fn spawn_health_probe_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_PROBE_INTERVAL);
            loop {
                interval.tick().await;
                worker.probe_coordinator().await;
            }
        })
    }

    pub fn spawn_metrics_push_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_PUSH_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(error) = worker.push_metrics(now_ms()).await {
                    tracing::warn!(%error, "metrics push failed");
                }
            }
        })
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Worker: Send, Sync, Debug);

    fn make_worker() -> Arc<Worker> {
        Worker::new(
            "w1",
            "http://127.0.0.1:9001",
            "token",
            Intents::empty(),
            WorkerCapabilities { memory_mb: 512, cores: 2, platform: "linux".into() },
            "http://127.0.0.1:9000",
            false,
            Arc::new(|_, _| {}),
            CoordinationClient::new(),
        )
    }

    #[tokio::test]
    async fn bootstrap_makes_this_node_the_coordinator() {
        let worker = make_worker();
        worker.bootstrap_as_coordinator(4, 0).await;
        assert!(worker.is_coordinator());
        assert_eq!(worker.total_shards(), 4);
        worker.coordinator().unwrap().shutdown();
    }

    #[test]
    fn classify_health_matches_the_documented_thresholds() {
        assert_eq!(classify_health(0.1), HealthLabel::Healthy);
        assert_eq!(classify_health(0.7), HealthLabel::Degraded);
        assert_eq!(classify_health(0.9), HealthLabel::Unhealthy);
    }

    #[tokio::test]
    async fn migration_for_a_different_source_is_ignored() {
        let worker = make_worker();
        worker.handle_migration(ShardMigrationRequest { shard_id: 0, from_node: "someone-else".into(), to_node: "w2".into(), reason: "test".into(), timestamp: 0 }).await;
    }

    #[tokio::test]
    async fn scenario_s7_applying_a_handoff_reclaims_position_one() {
        use shardline_model::PeerSnapshot;

        let original = Worker::new(
            "c0",
            "http://c0",
            "token",
            Intents::empty(),
            WorkerCapabilities { memory_mb: 512, cores: 2, platform: "linux".into() },
            "http://c1",
            true,
            Arc::new(|_, _| {}),
            CoordinationClient::new(),
        );

        // Before C0 died, C1 had already promoted and taken over its two
        // workers; this is the handoff C1 would have produced in response
        // to `POST /coordinator/resume`.
        let handoff = CoordinatorHandoffData {
            total_shards: 4,
            peers: vec![
                PeerSnapshot { process_id: "c1".into(), url: "http://c1".into(), assigned_shards: vec![0, 1], max_shards: None, last_heartbeat: 0, metrics: None },
                PeerSnapshot { process_id: "w3".into(), url: "http://w3".into(), assigned_shards: vec![2, 3], max_shards: None, last_heartbeat: 0, metrics: None },
            ],
            succession: vec![
                shardline_model::SuccessionEntryWire { position: 1, process_id: "c1".into(), url: "http://c1".into(), is_original_coordinator: false },
                shardline_model::SuccessionEntryWire { position: 2, process_id: "w3".into(), url: "http://w3".into(), is_original_coordinator: false },
            ],
        };

        original.apply_handoff(handoff);

        assert!(original.is_coordinator());
        assert_eq!(original.succession.position_of("c0"), Some(1));
        assert_eq!(original.succession.position_of("c1"), Some(2));

        let coordinator = original.coordinator().unwrap();
        assert_eq!(coordinator.total_shards(), 4);
        let mut assigned = coordinator.registry().all_assigned_shards();
        assigned.sort_unstable();
        assert_eq!(assigned, vec![0, 1, 2, 3]);

        coordinator.shutdown();
    }
}
