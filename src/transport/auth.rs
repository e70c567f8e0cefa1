// SPDX-License-Identifier: Apache-2.0

//! Bearer-token authorization middleware.
//!
//! Credential checking itself is an out-of-scope external collaborator
//! (spec §1, §12): [`CredentialChecker`] is the interface point a real
//! deployment plugs an implementation into. [`BearerTokenChecker`] is the
//! permissive placeholder — exact-match against a configured token, or an
//! unconditional pass when no token is configured.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::CoordinatorError;
use crate::state::AppState;

/// Out-of-scope interface point for inbound credential checking (spec §12).
pub trait CredentialChecker: Send + Sync {
    fn check(&self, token: Option<&str>) -> Result<(), CoordinatorError>;
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Default `CredentialChecker`: exact-match bearer token, permissive
/// passthrough when no token is configured.
pub struct BearerTokenChecker {
    expected: Option<String>,
}

impl BearerTokenChecker {
    pub fn new(expected: Option<String>) -> Self {
        Self { expected }
    }
}

impl CredentialChecker for BearerTokenChecker {
    fn check(&self, token: Option<&str>) -> Result<(), CoordinatorError> {
        let Some(expected) = self.expected.as_deref() else { return Ok(()) };
        match token {
            Some(t) if constant_time_eq(t, expected) => Ok(()),
            _ => Err(CoordinatorError::Unauthorized),
        }
    }
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Validate a token from a WebSocket query string (`?token=...`).
pub fn validate_ws_query(query: &str, checker: &dyn CredentialChecker) -> Result<(), CoordinatorError> {
    let token = query.split('&').find_map(|pair| pair.strip_prefix("token="));
    checker.check(token)
}

/// Axum middleware enforcing bearer-token authorization on authorized
/// edge endpoints.
///
/// Exempt: `/health` and the `/fingerprint/ws` upgrade (auth there is via
/// query param, validated in the WS handler itself).
pub async fn auth_layer(
    state: State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == "/fingerprint/ws" {
        return next.run(req).await;
    }

    let token = bearer_from_headers(req.headers());
    if let Err(e) = state.credential_checker.check(token) {
        let body = crate::error::ErrorResponse { error: e.to_error_body() };
        return (
            StatusCode::from_u16(e.http_status().as_u16()).unwrap_or(StatusCode::UNAUTHORIZED),
            axum::Json(body),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_when_no_token_configured() {
        let checker = BearerTokenChecker::new(None);
        assert!(checker.check(None).is_ok());
    }

    #[test]
    fn rejects_missing_token_when_configured() {
        let checker = BearerTokenChecker::new(Some("secret".into()));
        assert!(matches!(checker.check(None), Err(CoordinatorError::Unauthorized)));
    }

    #[test]
    fn accepts_matching_token() {
        let checker = BearerTokenChecker::new(Some("secret".into()));
        assert!(checker.check(Some("secret")).is_ok());
    }

    #[test]
    fn rejects_mismatched_token() {
        let checker = BearerTokenChecker::new(Some("secret".into()));
        assert!(matches!(checker.check(Some("wrong")), Err(CoordinatorError::Unauthorized)));
    }

    #[test]
    fn ws_query_extracts_token() {
        let checker = BearerTokenChecker::new(Some("abc".into()));
        assert!(validate_ws_query("subscribe=all&token=abc", &checker).is_ok());
        assert!(validate_ws_query("subscribe=all", &checker).is_err());
    }
}
