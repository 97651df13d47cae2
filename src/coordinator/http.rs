//! HTTP API for the coordinator
//!
//! JSON in, JSON out. Errors are returned as an [`ErrorBody`] with the status
//! from [`Error::to_http_status`](crate::Error::to_http_status).

use crate::common::{MetricsRegistry, NodeId, SnapshotId};
use crate::executor::engine::ExecutorEngine;
use crate::executor::membership::MembershipWatcher;
use crate::ops::backup::{BackupCoordinator, BackupRecord};
use crate::ops::dataload::{DataLoadPipeline, DataLoadTarget};
use crate::schema::{GraphSchema, SchemaService};
use crate::store::MemoryStoreCluster;
use crate::write::{WriteBatch, WriteCoordinator};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct CoordState {
    pub engine: Arc<ExecutorEngine>,
    pub cluster: Arc<MemoryStoreCluster>,
    pub writes: Arc<WriteCoordinator>,
    pub schema: Arc<SchemaService>,
    pub dataload: Arc<DataLoadPipeline>,
    pub backups: Arc<BackupCoordinator>,
    pub membership: Arc<MembershipWatcher>,
    pub metrics: Arc<MetricsRegistry>,
}

// ============================================================================
// Wire types (shared with the client)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientIdResponse {
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub snapshot_id: SnapshotId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub targets: Vec<DataLoadTarget>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitLoadRequest {
    pub tables: BTreeMap<u64, DataLoadTarget>,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupIdResponse {
    pub backup_id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeRequest {
    pub keep: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub deleted: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub meta_path: PathBuf,
    pub store_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipRequest {
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartitionCount {
    pub partitions: usize,
}

// ============================================================================
// Error mapping
// ============================================================================

pub struct ApiError(crate::Error);

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn ok() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// Write protocol
// ============================================================================

async fn get_client_id(State(state): State<CoordState>) -> Json<ClientIdResponse> {
    Json(ClientIdResponse {
        client_id: state.writes.get_client_id(),
    })
}

async fn batch_write(
    State(state): State<CoordState>,
    Json(batch): Json<WriteBatch>,
) -> ApiResult<Json<SnapshotBody>> {
    let snapshot_id = state.writes.batch_write(&batch).await?;
    Ok(Json(SnapshotBody { snapshot_id }))
}

async fn remote_flush(
    State(state): State<CoordState>,
    Json(req): Json<SnapshotBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.writes.remote_flush(req.snapshot_id).await?;
    Ok(ok())
}

// ============================================================================
// Schema
// ============================================================================

async fn get_schema(State(state): State<CoordState>) -> Json<GraphSchema> {
    Json(state.schema.get_schema())
}

async fn drop_schema(State(state): State<CoordState>) -> ApiResult<Json<GraphSchema>> {
    Ok(Json(state.schema.drop_schema()?))
}

async fn load_json_schema(
    State(state): State<CoordState>,
    body: String,
) -> ApiResult<Json<GraphSchema>> {
    Ok(Json(state.schema.load_json_schema(&body)?))
}

// ============================================================================
// Data load
// ============================================================================

async fn prepare_data_load(
    State(state): State<CoordState>,
    Json(req): Json<PrepareRequest>,
) -> ApiResult<Json<GraphSchema>> {
    Ok(Json(state.dataload.prepare(&req.targets)?))
}

async fn ingest_data(
    State(state): State<CoordState>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.dataload.ingest(&req.path)?;
    Ok(ok())
}

async fn commit_data_load(
    State(state): State<CoordState>,
    Json(req): Json<CommitLoadRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.dataload.commit(&req.tables, &req.path)?;
    Ok(ok())
}

async fn clear_ingest(State(state): State<CoordState>) -> Json<serde_json::Value> {
    state.dataload.clear_ingest();
    ok()
}

// ============================================================================
// Backups
// ============================================================================

async fn create_backup(State(state): State<CoordState>) -> ApiResult<impl IntoResponse> {
    let backup_id = state.backups.create()?;
    Ok((StatusCode::CREATED, Json(BackupIdResponse { backup_id })))
}

async fn list_backups(State(state): State<CoordState>) -> ApiResult<Json<Vec<BackupRecord>>> {
    Ok(Json(state.backups.list()?))
}

#[derive(Debug, Deserialize)]
struct GetBackupQuery {
    #[serde(default)]
    wait: bool,
}

async fn get_backup(
    State(state): State<CoordState>,
    Path(id): Path<u32>,
    Query(query): Query<GetBackupQuery>,
) -> ApiResult<Json<BackupRecord>> {
    if query.wait {
        return Ok(Json(state.backups.wait(id).await?));
    }
    let record = state
        .backups
        .list()?
        .into_iter()
        .find(|r| r.id == id)
        .ok_or(crate::Error::BackupNotFound(id))?;
    Ok(Json(record))
}

async fn delete_backup(
    State(state): State<CoordState>,
    Path(id): Path<u32>,
) -> ApiResult<Json<serde_json::Value>> {
    state.backups.delete(id)?;
    Ok(ok())
}

async fn purge_backups(
    State(state): State<CoordState>,
    Json(req): Json<PurgeRequest>,
) -> ApiResult<Json<PurgeResponse>> {
    Ok(Json(PurgeResponse {
        deleted: state.backups.purge(req.keep)?,
    }))
}

async fn verify_backup(
    State(state): State<CoordState>,
    Path(id): Path<u32>,
) -> ApiResult<Json<VerifyResponse>> {
    let (valid, message) = state.backups.verify(id)?;
    Ok(Json(VerifyResponse { valid, message }))
}

async fn restore_backup(
    State(state): State<CoordState>,
    Path(id): Path<u32>,
    Json(req): Json<RestoreRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .backups
        .restore(id, &req.meta_path, &req.store_path)
        .await?;
    Ok(ok())
}

// ============================================================================
// Membership & engine lifecycle
// ============================================================================

async fn nodes_join(
    State(state): State<CoordState>,
    Json(req): Json<MembershipRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    for node in &req.nodes {
        state.cluster.add_node(node.clone());
    }
    let seq = state.membership.on_nodes_join(req.nodes)?;
    state.membership.wait_applied(seq).await?;
    Ok(Json(json!({ "status": "ok", "seq": seq })))
}

async fn nodes_leave(
    State(state): State<CoordState>,
    Json(req): Json<MembershipRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let seq = state.membership.on_nodes_leave(req.nodes)?;
    state.membership.wait_applied(seq).await?;
    Ok(Json(json!({ "status": "ok", "seq": seq })))
}

async fn engine_start(State(state): State<CoordState>) -> ApiResult<Json<serde_json::Value>> {
    state.engine.start()?;
    Ok(Json(json!({ "state": state.engine.state() })))
}

async fn engine_stop(State(state): State<CoordState>) -> Json<serde_json::Value> {
    state.engine.stop();
    Json(json!({ "state": state.engine.state() }))
}

// ============================================================================
// Observability
// ============================================================================

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    #[serde(default)]
    roles: String,
}

async fn metrics(
    State(state): State<CoordState>,
    Query(query): Query<MetricsQuery>,
) -> Json<serde_json::Value> {
    Json(state.metrics.to_json(&query.roles))
}

async fn metrics_prometheus(State(state): State<CoordState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

async fn partition_count(State(state): State<CoordState>) -> Json<PartitionCount> {
    Json(PartitionCount {
        partitions: state.engine.partition_count(),
    })
}

async fn partitions(State(state): State<CoordState>) -> impl IntoResponse {
    Json(state.engine.routing().entries())
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "node_id": state.engine.node_id(),
        "state": state.engine.state(),
        "partitions": state.engine.partition_count(),
        "live_nodes": state.engine.live_nodes(),
        "routing_version": state.engine.routing().version(),
    }))
}

async fn health_ready(State(state): State<CoordState>) -> impl IntoResponse {
    if state.engine.is_serving() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "state": state.engine.state() })),
        )
    }
}

async fn health_live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/live", get(health_live))
        // Writes
        .route("/write/client", post(get_client_id))
        .route("/write/batch", post(batch_write))
        .route("/write/flush", post(remote_flush))
        // Schema
        .route(
            "/schema",
            get(get_schema).delete(drop_schema).post(load_json_schema),
        )
        // Data load
        .route("/dataload/prepare", post(prepare_data_load))
        .route("/dataload/ingest", post(ingest_data))
        .route("/dataload/commit", post(commit_data_load))
        .route("/dataload/clear", post(clear_ingest))
        // Backups
        .route("/backups", post(create_backup).get(list_backups))
        .route("/backups/purge", post(purge_backups))
        .route("/backups/:id", get(get_backup).delete(delete_backup))
        .route("/backups/:id/verify", get(verify_backup))
        .route("/backups/:id/restore", post(restore_backup))
        // Membership & lifecycle
        .route("/membership/join", post(nodes_join))
        .route("/membership/leave", post(nodes_leave))
        .route("/admin/start", post(engine_start))
        .route("/admin/stop", post(engine_stop))
        // Observability
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .route("/partitions", get(partitions))
        .route("/partitions/count", get(partition_count))
        .with_state(state)
}
