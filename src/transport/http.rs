// SPDX-License-Identifier: Apache-2.0

//! Edge HTTP surface (spec §6) — the handlers operators call directly.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::connectivity::is_online;
use crate::decisions::Verdict;
use crate::enrollment::EnrollmentCandidate;
use crate::error::CoordinatorError;
use crate::models::{DeviceConfigEntry, DeviceRuntime, MissingStudent, Student, SyncStatus};
use crate::state::AppState;

// -- Request/response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterStudentRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub phone_number: String,
    #[serde(default)]
    pub guardian_number: String,
    #[serde(default)]
    pub birth_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub school_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterStudentResponse {
    pub student: Student,
    pub online: bool,
    pub device_used: String,
}

#[derive(Debug, Deserialize)]
pub struct ListStudentsQuery {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct InitCounterQuery {
    pub start_value: i64,
}

#[derive(Debug, Serialize)]
pub struct ConnectivityStatusResponse {
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct DeviceStatusEntry {
    pub config: DeviceConfigEntry,
    pub runtime: DeviceRuntime,
}

#[derive(Debug, Serialize)]
pub struct MissingStudentsResponse {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub students: Vec<MissingStudent>,
}

fn sync_status_key(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Pending => "pending",
        SyncStatus::Syncing => "syncing",
        SyncStatus::Synced => "synced",
        SyncStatus::Failed => "failed",
        SyncStatus::Invalid => "invalid",
    }
}

#[derive(Debug, Serialize)]
pub struct SyncTriggerResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AttendanceStatusResponse {
    pub running: bool,
    pub active_devices: usize,
}

#[derive(Debug, Serialize)]
pub struct StartAttendanceResponse {
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub device_id: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub uid: i64,
    pub deleted_from_devices: usize,
    pub deleted_locally: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssistantDecisionQuery {
    pub decision: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health` — unauthenticated liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// `POST /students/register` — enrollment orchestrator entry point.
pub async fn register_student(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterStudentRequest>,
) -> Result<Json<RegisterStudentResponse>, CoordinatorError> {
    let candidate = EnrollmentCandidate {
        first_name: req.first_name,
        last_name: req.last_name,
        email: req.email,
        phone_number: req.phone_number,
        guardian_number: req.guardian_number,
        birth_date: req.birth_date,
        national_id: req.national_id,
        gender: req.gender,
        level: req.level,
        school_name: req.school_name,
    };
    let outcome = state.enrollment.enroll(candidate, state.config.auth_token.as_deref()).await?;
    Ok(Json(RegisterStudentResponse {
        student: outcome.student,
        online: outcome.online,
        device_used: outcome.device_used,
    }))
}

/// `DELETE /students/delete_fingerprint/{uid}` — device removal, then local.
pub async fn delete_fingerprint(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<i64>,
) -> Result<Json<DeleteResponse>, CoordinatorError> {
    let deleted_from_devices = state.enrollment.delete_from_all_devices(uid).await;
    state.store.delete_student(uid).await?;
    Ok(Json(DeleteResponse { uid, deleted_from_devices, deleted_locally: true }))
}

/// `DELETE /students/delete_from_all_devices/{uid}` — device-only removal.
pub async fn delete_from_all_devices(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<i64>,
) -> impl IntoResponse {
    let deleted_from_devices = state.enrollment.delete_from_all_devices(uid).await;
    Json(DeleteResponse { uid, deleted_from_devices, deleted_locally: false })
}

/// `GET /students/` — newest-first, paginated.
pub async fn list_students(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListStudentsQuery>,
) -> Result<Json<Vec<Student>>, CoordinatorError> {
    let students = state.store.list_students(q.skip, q.limit).await?;
    Ok(Json(students))
}

/// `POST /students/init-counter?start_value=N` — admin counter reset.
pub async fn init_counter(
    State(state): State<Arc<AppState>>,
    Query(q): Query<InitCounterQuery>,
) -> Result<impl IntoResponse, CoordinatorError> {
    state.allocator.initialize(q.start_value).await?;
    Ok(Json(serde_json::json!({ "initialized": true, "start_value": q.start_value })))
}

/// `GET /students/connectivity-status` — fresh probe against the remote.
pub async fn connectivity_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let online = is_online(state.remote.base_url(), state.config.probe_timeout()).await;
    Json(ConnectivityStatusResponse { online })
}

/// `GET /students/fingerprint-device-status` — registry snapshot.
pub async fn fingerprint_device_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot().await;
    let entries: Vec<DeviceStatusEntry> =
        snapshot.into_iter().map(|(config, runtime)| DeviceStatusEntry { config, runtime }).collect();
    Json(entries)
}

/// `GET /students/missing-students` — deferred-queue snapshot.
pub async fn missing_students(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MissingStudentsResponse>, CoordinatorError> {
    let students = state.store.list_missing_students().await?;
    let mut by_status: HashMap<String, usize> = HashMap::new();
    for m in &students {
        *by_status.entry(sync_status_key(m.sync_status).to_owned()).or_insert(0) += 1;
    }
    Ok(Json(MissingStudentsResponse { total: students.len(), by_status, students }))
}

/// `POST /students/sync-missing-students` — informational only; the sync
/// worker is always background-driven (spec §6).
pub async fn sync_missing_students() -> impl IntoResponse {
    Json(SyncTriggerResponse {
        message: "sync is performed automatically by the background worker".to_owned(),
    })
}

/// `POST /students/cleanup-synced-students` — sweep stuck `synced` rows.
pub async fn cleanup_synced_students(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let all = state.store.list_missing_students().await?;
    let mut removed = 0;
    for m in all {
        if m.sync_status == SyncStatus::Synced {
            state.store.delete_missing_student(m.uid()).await?;
            removed += 1;
        }
    }
    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// `POST /fingerprint/start_attendance` — start the capture supervision.
pub async fn start_attendance(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StartAttendanceResponse>, CoordinatorError> {
    let summary = state
        .registry
        .start_all(state.config.remote_timeout(), state.attendance.capture_callback())
        .await?;
    Ok(Json(StartAttendanceResponse { started: summary.started, failed: summary.failed }))
}

/// `POST /fingerprint/stop_attendance`.
pub async fn stop_attendance(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.registry.stop_all().await;
    Json(serde_json::json!({ "stopped": true }))
}

/// `GET /fingerprint/attendance-status`.
pub async fn attendance_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(AttendanceStatusResponse {
        running: state.registry.is_running().await,
        active_devices: state.registry.active_device_count().await,
    })
}

/// `GET /fingerprint/devices`.
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot().await;
    let entries: Vec<DeviceStatusEntry> =
        snapshot.into_iter().map(|(config, runtime)| DeviceStatusEntry { config, runtime }).collect();
    Json(entries)
}

/// `GET /fingerprint/devices/{id}`.
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStatusEntry>, CoordinatorError> {
    let config = state
        .registry
        .get(&device_id)
        .ok_or_else(|| CoordinatorError::DeviceConnection(format!("unknown device {device_id}")))?;
    let runtime = state.registry.runtime_status(&device_id).await.unwrap_or_default();
    Ok(Json(DeviceStatusEntry { config, runtime }))
}

/// `POST /fingerprint/devices/{id}/test-connection`.
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.connect_for_enrollment(&device_id, state.config.remote_timeout()).await {
        Ok(_) => Json(TestConnectionResponse { device_id, reachable: true, error: None }),
        Err(e) => Json(TestConnectionResponse { device_id, reachable: false, error: Some(e.to_string()) }),
    }
}

/// `GET /fingerprint/student-attendance/{uid}`.
pub async fn student_attendance(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<i64>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let student = state
        .store
        .find_student_by_uid(uid)
        .await?
        .ok_or_else(|| CoordinatorError::LocalStore(format!("no student with uid {uid}")))?;
    Ok(Json(student.attendance))
}

/// `GET /fingerprint/pending-decisions`.
pub async fn pending_decisions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.arbiter.list().await)
}

/// `POST /fingerprint/assistant-decision/{decision_id}?decision=approve|reject`.
pub async fn assistant_decision(
    State(state): State<Arc<AppState>>,
    Path(decision_id): Path<String>,
    Query(q): Query<AssistantDecisionQuery>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let verdict = match q.decision.as_str() {
        "approve" => Verdict::Approve,
        "reject" => Verdict::Reject,
        _ => return Err(CoordinatorError::DecisionNotFound),
    };
    state.arbiter.resolve(&decision_id, verdict, state.config.auth_token.as_deref()).await?;
    Ok(Json(serde_json::json!({ "decision_id": decision_id, "resolved": true })))
}
