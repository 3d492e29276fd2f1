//! HTTP surface: router, handlers, and the response envelope.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use fleet_core::{
    DetectionConfigPatch, EventKind, EventPayload, HostReport, ProcessReport, RegistryError,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::db::Database;
use crate::identity::{CallerIdentity, Operation};
use crate::{detection_store, event_log, host_registry, reconciler};

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub db: Database,
}

pub type SharedState = Arc<AppState>;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(msg: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        })
    }
}

fn registry_error_response(err: &RegistryError) -> Response {
    let status = match err {
        RegistryError::NotFound => StatusCode::NOT_FOUND,
        RegistryError::Validation { .. } => StatusCode::BAD_REQUEST,
        // Conflicts are retried inside the components; one escaping here
        // means the retry also lost, which the caller can simply repeat.
        RegistryError::Conflict => StatusCode::CONFLICT,
        RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    }
    (
        status,
        ApiResponse::<serde_json::Value>::err(&err.to_string()),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SnapshotRequest {
    machine_id: String,
    processes: Vec<ProcessReport>,
}

#[derive(Debug, Deserialize)]
struct AppendEventRequest {
    kind: EventKind,
    #[serde(flatten)]
    payload: EventPayload,
}

#[derive(Debug, Deserialize)]
struct ActiveConfigParams {
    /// Override for the staleness window, in hours. Defaults to 24.
    cutoff_hours: Option<i64>,
}

fn cutoff_from(params: &ActiveConfigParams) -> DateTime<Utc> {
    match params.cutoff_hours {
        Some(hours) => Utc::now() - Duration::hours(hours),
        None => detection_store::default_cutoff(),
    }
}

// ============================================================================
// Host Endpoints
// ============================================================================

async fn upsert_host(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Json(report): Json<HostReport>,
) -> Response {
    if let Err(resp) = caller.require(Operation::UpsertHost) {
        return resp;
    }
    match host_registry::upsert(&state.db, &caller.tenant_id, &report) {
        Ok(host) => ApiResponse::ok(host).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn list_hosts(State(state): State<SharedState>, caller: CallerIdentity) -> Response {
    if let Err(resp) = caller.require(Operation::ListHosts) {
        return resp;
    }
    match host_registry::list(&state.db, &caller.tenant_id) {
        Ok(hosts) => ApiResponse::ok(hosts).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn get_host(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(machine_id): Path<String>,
) -> Response {
    if let Err(resp) = caller.require(Operation::GetHost) {
        return resp;
    }
    match host_registry::by_machine(&state.db, &caller.tenant_id, &machine_id) {
        Ok(host) => ApiResponse::ok(host).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

// ============================================================================
// Process Snapshot Endpoints
// ============================================================================

async fn push_snapshot(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Json(req): Json<SnapshotRequest>,
) -> Response {
    if let Err(resp) = caller.require(Operation::PushSnapshot) {
        return resp;
    }
    // Per-item failures ride back in the 200 body; only an unknown machine
    // (or storage trouble resolving it) fails the batch as a whole.
    match reconciler::reconcile(&state.db, &caller.tenant_id, &req.machine_id, &req.processes) {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn list_processes_by_machine(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(machine_id): Path<String>,
) -> Response {
    if let Err(resp) = caller.require(Operation::ListProcessesByMachine) {
        return resp;
    }
    match reconciler::by_machine(&state.db, &caller.tenant_id, &machine_id) {
        Ok(processes) => ApiResponse::ok(processes).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

// ============================================================================
// Process Event Endpoints
// ============================================================================

async fn append_event(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(process_id): Path<String>,
    Json(req): Json<AppendEventRequest>,
) -> Response {
    if let Err(resp) = caller.require(Operation::AppendEvent) {
        return resp;
    }
    match event_log::append(
        &state.db,
        &caller.tenant_id,
        &process_id,
        req.kind,
        &req.payload,
    ) {
        Ok(event) => (StatusCode::CREATED, ApiResponse::ok(event)).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn list_events(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(process_id): Path<String>,
) -> Response {
    if let Err(resp) = caller.require(Operation::ListEvents) {
        return resp;
    }
    match event_log::all_events(&state.db, &caller.tenant_id, &process_id) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn latest_event(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(process_id): Path<String>,
) -> Response {
    if let Err(resp) = caller.require(Operation::LatestEvent) {
        return resp;
    }
    match event_log::latest_event(&state.db, &caller.tenant_id, &process_id) {
        Ok(event) => ApiResponse::ok(event).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn events_by_machine(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(machine_id): Path<String>,
) -> Response {
    if let Err(resp) = caller.require(Operation::ListEventsByMachine) {
        return resp;
    }
    match event_log::by_machine(&state.db, &caller.tenant_id, &machine_id) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

// ============================================================================
// Detection Config Endpoints
// ============================================================================

async fn upsert_detection_config(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(process_id): Path<String>,
    Json(patch): Json<DetectionConfigPatch>,
) -> Response {
    if let Err(resp) = caller.require(Operation::UpsertDetectionConfig) {
        return resp;
    }
    match detection_store::upsert(&state.db, &caller.tenant_id, &process_id, &patch) {
        Ok(config) => ApiResponse::ok(config).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn list_detection_configs(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Query(params): Query<ActiveConfigParams>,
) -> Response {
    if let Err(resp) = caller.require(Operation::ListDetectionConfigs) {
        return resp;
    }
    match detection_store::list_active(&state.db, &caller.tenant_id, cutoff_from(&params)) {
        Ok(configs) => ApiResponse::ok(configs).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn get_detection_config(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(config_id): Path<String>,
) -> Response {
    if let Err(resp) = caller.require(Operation::GetDetectionConfig) {
        return resp;
    }
    match detection_store::get(&state.db, &caller.tenant_id, &config_id) {
        Ok(config) => ApiResponse::ok(config).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

async fn detection_configs_by_machine(
    State(state): State<SharedState>,
    caller: CallerIdentity,
    Path(machine_id): Path<String>,
    Query(params): Query<ActiveConfigParams>,
) -> Response {
    if let Err(resp) = caller.require(Operation::ListDetectionConfigsByMachine) {
        return resp;
    }
    match detection_store::by_machine(
        &state.db,
        &caller.tenant_id,
        &machine_id,
        cutoff_from(&params),
    ) {
        Ok(configs) => ApiResponse::ok(configs).into_response(),
        Err(err) => registry_error_response(&err),
    }
}

// ============================================================================
// Health
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // Hosts API
        .route("/api/hosts", put(upsert_host).get(list_hosts))
        .route("/api/hosts/:machine_id", get(get_host))
        // Processes API
        .route("/api/processes", post(push_snapshot))
        .route(
            "/api/processes/by_machine/:machine_id",
            get(list_processes_by_machine),
        )
        // Process events API
        .route(
            "/api/processes/:id/events",
            post(append_event).get(list_events),
        )
        .route("/api/processes/:id/events/latest", get(latest_event))
        .route("/api/events/by_machine/:machine_id", get(events_by_machine))
        // Detection configs API (no DELETE route, by design)
        .route(
            "/api/processes/:id/detection-config",
            put(upsert_detection_config),
        )
        .route("/api/detection-configs", get(list_detection_configs))
        .route("/api/detection-configs/:id", get(get_detection_config))
        .route(
            "/api/detection-configs/by_machine/:machine_id",
            get(detection_configs_by_machine),
        )
        .layer(cors)
        .with_state(state)
}

/// Router over a fresh in-memory database, for in-process tests.
pub fn build_test_router() -> Router {
    let state = Arc::new(AppState {
        db: Database::open_in_memory().expect("in-memory database"),
    });
    build_router(state)
}
