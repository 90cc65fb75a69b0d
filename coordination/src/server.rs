//! The HTTP surface every node exposes (§6.2). A single router serves both
//! roles; coordinator-only routes answer with a role-mismatch error when
//! this node isn't currently coordinating.

use crate::{error::ErrorType, worker::Worker};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shardline_model::{
    CoordinatorHandoffData, CoordinatorResumedAnnouncement, CoordinatorResumptionRequest, ErrorResponse, ShardAssignment,
    ShardMigrationRequest, SuccessionUpdate, WorkerMetrics, WorkerRegistration,
};
use std::sync::Arc;

struct ApiError(crate::error::Error);

impl From<crate::error::Error> for ApiError {
    fn from(error: crate::error::Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorType::RoleMismatch { .. } | ErrorType::UnknownPeer { .. } => StatusCode::BAD_REQUEST,
            ErrorType::PeerUnreachable { .. } | ErrorType::MalformedResponse { .. } => StatusCode::BAD_GATEWAY,
        };
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn role_mismatch(expected: &str) -> ApiError {
    ApiError(crate::error::Error::role_mismatch(expected))
}

/// Builds the router for one node. `worker` is shared across every
/// connection; role-specific behavior is resolved per-request by checking
/// [`Worker::coordinator`].
pub fn router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/metrics", post(metrics))
        .route("/cluster", get(cluster))
        .route("/assignment", post(assignment))
        .route("/migrate", post(migrate))
        .route("/succession", post(succession))
        .route("/coordinator/resume", post(resume))
        .route("/coordinator/handoff", post(handoff))
        .route("/coordinator/resumed", post(resumed))
        .fallback(not_found)
        .with_state(worker)
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("no such route"))).into_response()
}

async fn health(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    Json(worker.health_response(now_ms()))
}

async fn register(State(worker): State<Arc<Worker>>, Json(registration): Json<WorkerRegistration>) -> Result<impl IntoResponse, ApiError> {
    let coordinator = worker.coordinator().ok_or_else(|| role_mismatch("the coordinator"))?;
    Ok(Json(coordinator.register(registration, now_ms()).await))
}

async fn metrics(State(worker): State<Arc<Worker>>, Json(metrics): Json<WorkerMetrics>) -> Result<StatusCode, ApiError> {
    let coordinator = worker.coordinator().ok_or_else(|| role_mismatch("the coordinator"))?;
    coordinator.metrics(metrics, now_ms())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cluster(State(worker): State<Arc<Worker>>) -> Result<impl IntoResponse, ApiError> {
    let coordinator = worker.coordinator().ok_or_else(|| role_mismatch("the coordinator"))?;
    Ok(Json(coordinator.cluster_state()))
}

async fn assignment(State(worker): State<Arc<Worker>>, Json(body): Json<ShardAssignment>) -> StatusCode {
    worker.handle_assignment(body);
    StatusCode::NO_CONTENT
}

async fn migrate(State(worker): State<Arc<Worker>>, Json(body): Json<ShardMigrationRequest>) -> StatusCode {
    worker.handle_migration(body).await;
    StatusCode::NO_CONTENT
}

async fn succession(State(worker): State<Arc<Worker>>, Json(body): Json<SuccessionUpdate>) -> StatusCode {
    worker.handle_succession(body);
    StatusCode::NO_CONTENT
}

async fn resume(State(worker): State<Arc<Worker>>, Json(body): Json<CoordinatorResumptionRequest>) -> Result<impl IntoResponse, ApiError> {
    let coordinator = worker.coordinator().ok_or_else(|| role_mismatch("a temporary coordinator"))?;
    Ok(Json(coordinator.resume(&body)?))
}

async fn handoff(State(worker): State<Arc<Worker>>, Json(body): Json<CoordinatorHandoffData>) -> StatusCode {
    worker.apply_handoff(body);
    StatusCode::NO_CONTENT
}

async fn resumed(State(worker): State<Arc<Worker>>, Json(body): Json<CoordinatorResumedAnnouncement>) -> StatusCode {
    worker.handle_resumed(body).await;
    StatusCode::NO_CONTENT
}
