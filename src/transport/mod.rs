// SPDX-License-Identifier: Apache-2.0

//! HTTP + WebSocket transport for the edge attendance coordinator.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with the full edge HTTP surface (spec §6).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/students/register", post(http::register_student))
        .route("/students/delete_fingerprint/{uid}", delete(http::delete_fingerprint))
        .route("/students/delete_from_all_devices/{uid}", delete(http::delete_from_all_devices))
        .route("/students/", get(http::list_students))
        .route("/students/init-counter", post(http::init_counter))
        .route("/students/connectivity-status", get(http::connectivity_status))
        .route("/students/fingerprint-device-status", get(http::fingerprint_device_status))
        .route("/students/missing-students", get(http::missing_students))
        .route("/students/sync-missing-students", post(http::sync_missing_students))
        .route("/students/cleanup-synced-students", post(http::cleanup_synced_students))
        .route("/fingerprint/start_attendance", post(http::start_attendance))
        .route("/fingerprint/stop_attendance", post(http::stop_attendance))
        .route("/fingerprint/attendance-status", get(http::attendance_status))
        .route("/fingerprint/devices", get(http::list_devices))
        .route("/fingerprint/devices/{id}", get(http::get_device))
        .route("/fingerprint/devices/{id}/test-connection", post(http::test_connection))
        .route("/fingerprint/student-attendance/{uid}", get(http::student_attendance))
        .route("/fingerprint/pending-decisions", get(http::pending_decisions))
        .route("/fingerprint/assistant-decision/{decision_id}", post(http::assistant_decision))
        .route("/fingerprint/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
