//! Detection config API integration tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use fleet_server::{build_router, AppState, Database, SharedState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn machine_id() -> String {
    "cafebabecafebabecafebabecafebabe".to_string()
}

fn request(method: &str, uri: &str, tenant: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder
            .header("x-user-id", format!("user-of-{}", tenant))
            .header("x-tenant-id", tenant);
    }
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Router plus a handle on the state, so tests can reach the database.
fn app_with_state() -> (Router, SharedState) {
    let state = Arc::new(AppState {
        db: Database::open_in_memory().expect("in-memory database"),
    });
    (build_router(state.clone()), state)
}

/// Registers a host and one process, returning the process id.
async fn seed_process(app: &Router, tenant: &str) -> String {
    send(
        app,
        request(
            "PUT",
            "/api/hosts",
            Some(tenant),
            Some(json!({ "machine_id": machine_id() })),
        ),
    )
    .await;
    let (_, pushed) = send(
        app,
        request(
            "POST",
            "/api/processes",
            Some(tenant),
            Some(json!({
                "machine_id": machine_id(),
                "processes": [{
                    "pid": 42,
                    "executable": "/usr/bin/redis-server",
                    "command_line": "redis-server *:6379",
                    "create_time": Utc::now().to_rfc3339(),
                }],
            })),
        ),
    )
    .await;
    pushed["data"]["created"][0]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn config_upsert_patches_in_place() {
    let (app, _) = app_with_state();
    let process_id = seed_process(&app, "tenant-a").await;
    let uri = format!("/api/processes/{}/detection-config", process_id);

    let (status, first) = send(
        &app,
        request(
            "PUT",
            &uri,
            Some("tenant-a"),
            Some(json!({ "detect_signals": true })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Fresh config carries the domain default for signal restarts.
    assert_eq!(first["data"]["restart_on_signal"], true);

    let (_, second) = send(
        &app,
        request(
            "PUT",
            &uri,
            Some("tenant-a"),
            Some(json!({ "detect_thresholds": true, "memory_threshold": 4096 })),
        ),
    )
    .await;

    assert_eq!(first["data"]["id"], second["data"]["id"]);
    assert_eq!(first["data"]["created_at"], second["data"]["created_at"]);
    assert_eq!(second["data"]["detect_signals"], true);
    assert_eq!(second["data"]["detect_thresholds"], true);
    assert_eq!(second["data"]["memory_threshold"], 4096);

    let uri = format!("/api/detection-configs/{}", first["data"]["id"].as_str().unwrap());
    let (status, fetched) = send(&app, request("GET", &uri, Some("tenant-a"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["data"]["memory_threshold"], 4096);
}

#[tokio::test]
async fn active_listings_window_on_process_freshness() {
    let (app, state) = app_with_state();
    let process_id = seed_process(&app, "tenant-a").await;
    let uri = format!("/api/processes/{}/detection-config", process_id);
    send(&app, request("PUT", &uri, Some("tenant-a"), Some(json!({})))).await;

    let (_, listed) = send(
        &app,
        request("GET", "/api/detection-configs", Some("tenant-a"), None),
    )
    .await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    // Age the process past the default one-day window.
    let mut process = state
        .db
        .get_process_by_id("tenant-a", &process_id)
        .unwrap()
        .unwrap();
    process.last_seen_at = Utc::now() - Duration::days(2);
    state.db.update_process(&process).unwrap();

    let (_, listed) = send(
        &app,
        request("GET", "/api/detection-configs", Some("tenant-a"), None),
    )
    .await;
    assert!(listed["data"].as_array().unwrap().is_empty());

    // A wider explicit window brings it back.
    let (_, listed) = send(
        &app,
        request(
            "GET",
            "/api/detection-configs?cutoff_hours=72",
            Some("tenant-a"),
            None,
        ),
    )
    .await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let uri = format!(
        "/api/detection-configs/by_machine/{}?cutoff_hours=72",
        machine_id()
    );
    let (_, listed) = send(&app, request("GET", &uri, Some("tenant-a"), None)).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn configs_cannot_be_deleted() {
    let (app, _) = app_with_state();
    let process_id = seed_process(&app, "tenant-a").await;
    let uri = format!("/api/processes/{}/detection-config", process_id);
    let (_, created) = send(&app, request("PUT", &uri, Some("tenant-a"), Some(json!({})))).await;

    let uri = format!("/api/detection-configs/{}", created["data"]["id"].as_str().unwrap());
    let (status, _) = send(&app, request("DELETE", &uri, Some("tenant-a"), None)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn configure_scope_is_enforced() {
    let (app, _) = app_with_state();
    let process_id = seed_process(&app, "tenant-a").await;
    let uri = format!("/api/processes/{}/detection-config", process_id);

    // Agent credentials can report but not configure.
    let req = Request::builder()
        .method("PUT")
        .uri(&uri)
        .header("x-user-id", "agent-1")
        .header("x-tenant-id", "tenant-a")
        .header("x-scopes", "report,read_state")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "detect_signals": true }).to_string()))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn cross_tenant_config_reads_are_not_found() {
    let (app, _) = app_with_state();
    let process_id = seed_process(&app, "tenant-a").await;
    let uri = format!("/api/processes/{}/detection-config", process_id);
    let (_, created) = send(&app, request("PUT", &uri, Some("tenant-a"), Some(json!({})))).await;

    let uri = format!("/api/detection-configs/{}", created["data"]["id"].as_str().unwrap());
    let (status, _) = send(&app, request("GET", &uri, Some("tenant-b"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
