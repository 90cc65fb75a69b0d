//! Typed HTTP caller used to talk to peers (§6.2). Every call shares a
//! single `reqwest::Client` and a 10-second total timeout (§5).

use crate::error::{Error, Result};
use shardline_model::{
    ClusterState, CoordinatorHandoffData, CoordinatorResumedAnnouncement, CoordinatorResumptionRequest, HealthResponse,
    ShardAssignment, ShardMigrationRequest, SuccessionUpdate, WorkerMetrics, WorkerRegistration, WorkerRegistrationResponse,
};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct CoordinationClient {
    http: reqwest::Client,
}

impl CoordinationClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest::Client::builder with only a timeout never fails");

        Self { http }
    }

    pub async fn register(&self, coordinator_url: &str, registration: &WorkerRegistration) -> Result<WorkerRegistrationResponse> {
        self.post(coordinator_url, "/register", registration).await
    }

    pub async fn metrics(&self, coordinator_url: &str, metrics: &WorkerMetrics) -> Result<()> {
        self.post_no_content(coordinator_url, "/metrics", metrics).await
    }

    pub async fn health(&self, url: &str) -> Result<HealthResponse> {
        self.get(url, "/health").await
    }

    pub async fn cluster(&self, coordinator_url: &str) -> Result<ClusterState> {
        self.get(coordinator_url, "/cluster").await
    }

    pub async fn send_assignment(&self, worker_url: &str, assignment: &ShardAssignment) -> Result<()> {
        self.post_no_content(worker_url, "/assignment", assignment).await
    }

    pub async fn send_migration(&self, worker_url: &str, request: &ShardMigrationRequest) -> Result<()> {
        self.post_no_content(worker_url, "/migrate", request).await
    }

    pub async fn send_succession(&self, peer_url: &str, update: &SuccessionUpdate) -> Result<()> {
        self.post_no_content(peer_url, "/succession", update).await
    }

    pub async fn resume(&self, temp_coordinator_url: &str, request: &CoordinatorResumptionRequest) -> Result<CoordinatorHandoffData> {
        self.post(temp_coordinator_url, "/coordinator/resume", request).await
    }

    pub async fn handoff(&self, original_coordinator_url: &str, data: &CoordinatorHandoffData) -> Result<()> {
        self.post_no_content(original_coordinator_url, "/coordinator/handoff", data).await
    }

    pub async fn resumed(&self, worker_url: &str, announcement: &CoordinatorResumedAnnouncement) -> Result<()> {
        self.post_no_content(worker_url, "/coordinator/resumed", announcement).await
    }

    async fn post<B: serde::Serialize, T: serde::de::DeserializeOwned>(&self, base: &str, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", base.trim_end_matches('/'));
        let response = self.http.post(&url).json(body).send().await.map_err(|source| Error::peer_unreachable(base, source))?;
        response.error_for_status_ref().map_err(|source| Error::peer_unreachable(base, source))?;
        response.json().await.map_err(|source| Error::malformed_response(base, source))
    }

    async fn post_no_content<B: serde::Serialize>(&self, base: &str, path: &str, body: &B) -> Result<()> {
        let url = format!("{}{path}", base.trim_end_matches('/'));
        let response = self.http.post(&url).json(body).send().await.map_err(|source| Error::peer_unreachable(base, source))?;
        response.error_for_status().map(drop).map_err(|source| Error::peer_unreachable(base, source))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, base: &str, path: &str) -> Result<T> {
        let url = format!("{}{path}", base.trim_end_matches('/'));
        let response = self.http.get(&url).send().await.map_err(|source| Error::peer_unreachable(base, source))?;
        response.error_for_status_ref().map_err(|source| Error::peer_unreachable(base, source))?;
        response.json().await.map_err(|source| Error::malformed_response(base, source))
    }
}

impl Default for CoordinationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(CoordinationClient: Clone, Send, Sync, std::fmt::Debug);

    #[tokio::test]
    async fn unreachable_host_surfaces_as_peer_unreachable() {
        let client = CoordinationClient::new();
        let error = client.health("http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(error.kind(), crate::error::ErrorType::PeerUnreachable { .. }));
    }
}
