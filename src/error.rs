// SPDX-License-Identifier: Apache-2.0

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds the coordination core distinguishes (spec §7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorError {
    /// Device config missing or malformed. Recovery is a fallback to a
    /// single default device, so this is never surfaced past startup.
    Config(String),
    /// Transient device connection failure; the device is marked `error`.
    DeviceConnection(String),
    /// Enrollment timed out with no finger placed.
    DeviceEnrollmentTimeout,
    /// The device reports the uid is already enrolled.
    DeviceUserExists,
    /// All devices failed during multi-device enrollment.
    DeviceEnrollmentFailed(String),
    /// Remote rejected the request on policy grounds (blacklist, schedule).
    RemotePolicyReject(String),
    /// Remote returned a non-policy server error.
    RemoteServerError(String),
    /// The local store failed to read or write a record.
    LocalStore(String),
    /// `decision_id` does not name a pending decision.
    DecisionNotFound,
    /// The identifier counter has reached `MAX_UID`.
    CounterExhausted,
    /// Missing or invalid bearer token on an authorized endpoint.
    Unauthorized,
}

impl CoordinatorError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DeviceConnection(_) => StatusCode::BAD_GATEWAY,
            Self::DeviceEnrollmentTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::DeviceUserExists => StatusCode::CONFLICT,
            Self::DeviceEnrollmentFailed(_) => StatusCode::BAD_GATEWAY,
            Self::RemotePolicyReject(_) => StatusCode::FORBIDDEN,
            Self::RemoteServerError(_) => StatusCode::BAD_GATEWAY,
            Self::LocalStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DecisionNotFound => StatusCode::BAD_REQUEST,
            Self::CounterExhausted => StatusCode::INSUFFICIENT_STORAGE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::DeviceConnection(_) => "DEVICE_CONNECTION_ERROR",
            Self::DeviceEnrollmentTimeout => "DEVICE_ENROLLMENT_TIMEOUT",
            Self::DeviceUserExists => "DEVICE_USER_EXISTS",
            Self::DeviceEnrollmentFailed(_) => "DEVICE_ENROLLMENT_FAILED",
            Self::RemotePolicyReject(_) => "REMOTE_POLICY_REJECT",
            Self::RemoteServerError(_) => "REMOTE_SERVER_ERROR",
            Self::LocalStore(_) => "LOCAL_STORE_ERROR",
            Self::DecisionNotFound => "DECISION_NOT_FOUND",
            Self::CounterExhausted => "COUNTER_EXHAUSTED",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Config(m)
            | Self::DeviceConnection(m)
            | Self::DeviceEnrollmentFailed(m)
            | Self::RemotePolicyReject(m)
            | Self::RemoteServerError(m)
            | Self::LocalStore(m) => m.clone(),
            Self::DeviceEnrollmentTimeout => "no finger placed before timeout".to_owned(),
            Self::DeviceUserExists => "uid already enrolled on device".to_owned(),
            Self::DecisionNotFound => "no pending decision with that id".to_owned(),
            Self::CounterExhausted => "identifier counter has reached MAX_UID".to_owned(),
            Self::Unauthorized => "missing or invalid bearer token".to_owned(),
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody { code: self.code().to_owned(), message: self.message() }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        (self.http_status(), Json(ErrorResponse { error: self.to_error_body() }))
    }
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for CoordinatorError {}

impl axum::response::IntoResponse for CoordinatorError {
    fn into_response(self) -> axum::response::Response {
        self.to_http_response().into_response()
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Classified failure of a call to the remote backend (spec §4.4).
///
/// Network unavailability and timeouts are never treated as remote
/// failures by callers — they trigger offline-path routing instead of
/// propagating as a [`CoordinatorError`].
#[derive(Debug, Clone)]
pub enum RemoteError {
    NetworkUnavailable(String),
    Timeout,
    RemoteError { status: u16, body: String },
    BadResponse(String),
}

impl RemoteError {
    /// True for the two kinds that must route to the offline path rather
    /// than being surfaced as a remote failure.
    pub fn is_offline_signal(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_) | Self::Timeout)
    }

    /// True when the remote body mentions a schedule/group policy rejection
    /// (spec §4.8, §6): `400` with "not allowed on" or "Group schedule".
    pub fn is_schedule_reject(&self) -> bool {
        match self {
            Self::RemoteError { status: 400, body } => {
                body.contains("not allowed on") || body.contains("Group schedule")
            }
            _ => false,
        }
    }

    /// True when the remote body mentions a blacklist rejection (spec §4.7).
    pub fn is_blacklist_reject(&self) -> bool {
        match self {
            Self::RemoteError { body, .. } => body.to_lowercase().contains("blacklist"),
            _ => false,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkUnavailable(e) => write!(f, "network unavailable: {e}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::RemoteError { status, body } => write!(f, "remote error {status}: {body}"),
            Self::BadResponse(e) => write!(f, "bad response: {e}"),
        }
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_reject_detects_not_allowed_on() {
        let e = RemoteError::RemoteError {
            status: 400,
            body: "Attendance not allowed on Monday".to_owned(),
        };
        assert!(e.is_schedule_reject());
        assert!(!e.is_blacklist_reject());
    }

    #[test]
    fn schedule_reject_detects_group_schedule() {
        let e = RemoteError::RemoteError { status: 400, body: "Group schedule violated".into() };
        assert!(e.is_schedule_reject());
    }

    #[test]
    fn blacklist_reject_is_case_insensitive() {
        let e = RemoteError::RemoteError { status: 403, body: "Student is BLACKLISTED".into() };
        assert!(e.is_blacklist_reject());
        assert!(!e.is_schedule_reject());
    }

    #[test]
    fn offline_signal_covers_network_and_timeout_only() {
        assert!(RemoteError::Timeout.is_offline_signal());
        assert!(RemoteError::NetworkUnavailable("dns".into()).is_offline_signal());
        assert!(
            !RemoteError::RemoteError { status: 500, body: String::new() }.is_offline_signal()
        );
    }
}
