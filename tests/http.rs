// SPDX-License-Identifier: Apache-2.0

//! End-to-end HTTP-surface tests against the concrete scenarios in spec §8.
//!
//! The remote central backend is simulated with a small local axum server
//! rather than a mock HTTP library, the same way the device driver is
//! simulated with `FakeDriver` — both are out-of-scope external
//! collaborators stood in by hand.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxPath, State as AxState};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use edge_coordinator::config::EdgeConfig;
use edge_coordinator::devices::fake::FakeDriver;
use edge_coordinator::devices::registry::DeviceRegistry;
use edge_coordinator::models::DeviceConfigEntry;
use edge_coordinator::remote::RemoteClient;
use edge_coordinator::state::AppState;
use edge_coordinator::store::InMemoryStore;
use edge_coordinator::transport::build_router;

#[derive(Clone, Default)]
struct RemoteBehavior {
    attendance_reject: Arc<AtomicBool>,
}

async fn fake_remote_next_ids() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "uid": 10019, "student_id": "10019" }))
}

async fn fake_remote_create_student(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(body)
}

async fn fake_remote_get_student(AxPath(_uid): AxPath<i64>) -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_FOUND
}

async fn fake_remote_attendance(
    AxState(behavior): AxState<RemoteBehavior>,
    Json(_body): Json<serde_json::Value>,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    if behavior.attendance_reject.load(Ordering::SeqCst) {
        (axum::http::StatusCode::BAD_REQUEST, "Attendance not allowed on Monday").into_response()
    } else {
        Json(serde_json::json!({ "ok": true })).into_response()
    }
}

async fn spawn_fake_remote(behavior: RemoteBehavior) -> String {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/students/next-ids", get(fake_remote_next_ids))
        .route("/students/", post(fake_remote_create_student))
        .route("/students/{uid}", get(fake_remote_get_student))
        .route("/attendance/", post(fake_remote_attendance))
        .with_state(behavior);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn device_config() -> DeviceConfigEntry {
    DeviceConfigEntry {
        device_id: "d1".into(),
        ip: "127.0.0.1".into(),
        port: 0,
        name: "D1".into(),
        location: "Room".into(),
        enabled: true,
    }
}

fn edge_config(remote_url: &str, auth_token: Option<String>) -> EdgeConfig {
    EdgeConfig {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token,
        mongo_uri: None,
        database_name: None,
        host_remote_url: remote_url.to_owned(),
        device_config: "/nonexistent/devices.json".into(),
        remote_timeout_ms: 500,
        probe_timeout_ms: 200,
        sync_interval_secs: 60,
        sync_max_attempts: 3,
        timestamp_tz: "UTC".into(),
    }
}

fn build_state(remote_url: &str, auth_token: Option<String>) -> Arc<AppState> {
    let store = InMemoryStore::new();
    let registry = DeviceRegistry::new(Arc::new(FakeDriver::new()), vec![device_config()]);
    let remote = Arc::new(RemoteClient::new(remote_url.to_owned(), Duration::from_millis(500)));
    AppState::new(edge_config(remote_url, auth_token), store, registry, remote, CancellationToken::new())
}

fn register_body() -> serde_json::Value {
    serde_json::json!({
        "first_name": "A",
        "last_name": "B",
        "phone_number": "0",
    })
}

#[tokio::test]
async fn health_requires_no_auth() {
    let state = build_state("http://127.0.0.1:1", Some("secret".into()));
    let server = TestServer::new(build_router(state)).unwrap();
    let resp = server.get("/health").await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn authorized_endpoint_rejects_missing_token() {
    let state = build_state("http://127.0.0.1:1", Some("secret".into()));
    let server = TestServer::new(build_router(state)).unwrap();
    let resp = server.get("/students/").await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authorized_endpoint_accepts_matching_bearer_token() {
    let state = build_state("http://127.0.0.1:1", Some("secret".into()));
    let server = TestServer::new(build_router(state)).unwrap();
    let resp = server.get("/students/").authorization_bearer("secret").await;
    resp.assert_status_ok();
}

/// Scenario 1: offline registration creates both `Student` and
/// `MissingStudent` with `sync_status = pending`.
#[tokio::test]
async fn offline_registration_creates_missing_student() {
    // Port 1 is never reachable locally, simulating a down remote.
    let state = build_state("http://127.0.0.1:1", None);
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let resp = server.post("/students/register").json(&register_body()).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["online"], false);
    let uid = body["student"]["uid"].as_i64().unwrap();

    let missing = state.store.find_missing_student(uid).await.unwrap();
    assert!(missing.is_some());
    assert_eq!(missing.unwrap().sync_status, edge_coordinator::models::SyncStatus::Pending);
}

/// Scenario 5 (HTTP-surface variant): registration succeeding online does
/// not create a `MissingStudent` row.
#[tokio::test]
async fn online_registration_does_not_defer_sync() {
    let behavior = RemoteBehavior::default();
    let remote_url = spawn_fake_remote(behavior).await;
    let state = build_state(&remote_url, None);
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let resp = server.post("/students/register").json(&register_body()).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["online"], true);
    let uid = body["student"]["uid"].as_i64().unwrap();

    assert!(state.store.find_missing_student(uid).await.unwrap().is_none());
    assert!(state.store.find_student_by_uid(uid).await.unwrap().is_some());
}

/// Scenario 3: a schedule-policy rejection creates a pending decision;
/// approving it via the HTTP endpoint appends the attendance entry.
#[tokio::test]
async fn schedule_rejection_then_assistant_approval() {
    let behavior = RemoteBehavior::default();
    behavior.attendance_reject.store(true, Ordering::SeqCst);
    let remote_url = spawn_fake_remote(behavior).await;
    let state = build_state(&remote_url, None);

    let student = edge_coordinator::models::Student {
        uid: 10019,
        student_id: "10019".into(),
        first_name: "A".into(),
        last_name: "B".into(),
        email: None,
        phone_number: "0".into(),
        guardian_number: String::new(),
        birth_date: None,
        national_id: None,
        gender: None,
        level: None,
        school_name: None,
        is_subscription: true,
        fingerprint_template: None,
        attendance: Default::default(),
    };
    state.store.insert_student(student).await.unwrap();

    let server = TestServer::new(build_router(state.clone())).unwrap();

    state
        .attendance
        .capture_callback()(
            "d1".to_owned(),
            edge_coordinator::devices::driver::CaptureEvent { uid: 10019, device_timestamp: chrono::Utc::now() },
        )
        .await;

    let pending = state.arbiter.list().await;
    assert_eq!(pending.len(), 1);
    let decision_id = pending[0].decision_id.clone();

    let resp = server
        .post(&format!("/fingerprint/assistant-decision/{decision_id}?decision=approve"))
        .await;
    resp.assert_status_ok();

    assert!(state.arbiter.list().await.is_empty());
    let student = state.store.find_student_by_uid(10019).await.unwrap().unwrap();
    assert_eq!(
        student.attendance.get("day1"),
        Some(&edge_coordinator::models::AttendanceValue::Validated(true))
    );
}

#[tokio::test]
async fn attendance_status_reports_active_device_count() {
    let state = build_state("http://127.0.0.1:1", None);
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let resp = server.post("/fingerprint/start_attendance").await;
    resp.assert_status_ok();

    let resp = server.get("/fingerprint/attendance-status").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["running"], true);
    assert_eq!(body["active_devices"], 1);

    state.registry.stop_all().await;
}
