// SPDX-License-Identifier: Apache-2.0

//! Remote Client (C4): typed façade over the remote backend's HTTP surface
//! (spec §4.4, §6).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

/// Default per-call timeout (spec §4.4).
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct NextIdsResponse {
    pub uid: i64,
    pub student_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendancePost {
    pub uid: i64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub assistant_approved: bool,
}

/// Typed client for the remote central backend.
///
/// Stateless: callers supply authorization headers when available. The
/// enrollment endpoints are authorized; attendance posts from the edge are
/// unauthenticated (spec §4.4).
pub struct RemoteClient {
    base_url: String,
    client: Client,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { base_url: base_url.into(), client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn classify(resp: reqwest::Result<reqwest::Response>) -> Result<reqwest::Response, RemoteError> {
        match resp {
            Ok(r) => Ok(r),
            Err(e) if e.is_timeout() => Err(RemoteError::Timeout),
            Err(e) => Err(RemoteError::NetworkUnavailable(e.to_string())),
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::RemoteError { status, body })
    }

    /// `GET /students/next-ids` (authorized).
    pub async fn next_ids(&self, auth_token: Option<&str>) -> Result<NextIdsResponse, RemoteError> {
        let mut req = self.client.get(self.url("/students/next-ids"));
        if let Some(token) = auth_token {
            req = req.bearer_auth(token);
        }
        let resp = Self::classify(req.send().await).await?;
        let resp = Self::check_status(resp).await?;
        resp.json().await.map_err(|e| RemoteError::BadResponse(e.to_string()))
    }

    /// `POST /students/` (authorized). Returns the created student payload.
    pub async fn create_student(
        &self,
        body: &Value,
        auth_token: Option<&str>,
    ) -> Result<Value, RemoteError> {
        let mut req = self.client.post(self.url("/students/")).json(body);
        if let Some(token) = auth_token {
            req = req.bearer_auth(token);
        }
        let resp = Self::classify(req.send().await).await?;
        let resp = Self::check_status(resp).await?;
        resp.json().await.map_err(|e| RemoteError::BadResponse(e.to_string()))
    }

    /// `GET /students/{uid}` — used by the sync worker for idempotency
    /// (spec §4.10). Returns `Ok(Some(_))` on 200, `Ok(None)` on 404.
    pub async fn get_student(&self, uid: i64) -> Result<Option<Value>, RemoteError> {
        let resp = Self::classify(self.client.get(self.url(&format!("/students/{uid}"))).send().await)
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = Self::check_status(resp).await?;
        resp.json().await.map(Some).map_err(|e| RemoteError::BadResponse(e.to_string()))
    }

    /// `GET /students/by-student-id/{numeric}` — consumed by the
    /// exam-correction collaborator (out of scope; interface only).
    pub async fn get_student_by_student_id(&self, numeric: &str) -> Result<Value, RemoteError> {
        let resp = Self::classify(
            self.client.get(self.url(&format!("/students/by-student-id/{numeric}"))).send().await,
        )
        .await?;
        let resp = Self::check_status(resp).await?;
        resp.json().await.map_err(|e| RemoteError::BadResponse(e.to_string()))
    }

    /// `POST /attendance/` with `{uid, timestamp}` or
    /// `{uid, timestamp, assistant_approved: true}` (spec §4.8, §6, §4.9).
    pub async fn post_attendance(&self, post: &AttendancePost) -> Result<Value, RemoteError> {
        let resp =
            Self::classify(self.client.post(self.url("/attendance/")).json(post).send().await)
                .await?;
        let resp = Self::check_status(resp).await?;
        resp.json().await.map_err(|e| RemoteError::BadResponse(e.to_string()))
    }

    /// `GET /internal/exams/{id}` — exam-correction collaborator interface.
    pub async fn get_exam(&self, exam_id: &str) -> Result<Value, RemoteError> {
        let resp =
            Self::classify(self.client.get(self.url(&format!("/internal/exams/{exam_id}"))).send().await)
                .await?;
        let resp = Self::check_status(resp).await?;
        resp.json().await.map_err(|e| RemoteError::BadResponse(e.to_string()))
    }

    /// `POST /internal/exams/{id}/results` — exam-correction collaborator interface.
    pub async fn post_exam_results(&self, exam_id: &str, body: &Value) -> Result<Value, RemoteError> {
        let resp = Self::classify(
            self.client
                .post(self.url(&format!("/internal/exams/{exam_id}/results")))
                .json(body)
                .send()
                .await,
        )
        .await?;
        let resp = Self::check_status(resp).await?;
        resp.json().await.map_err(|e| RemoteError::BadResponse(e.to_string()))
    }

    /// `PUT /internal/exams/{id}/students/{id}/results` — exam-correction
    /// collaborator interface.
    pub async fn put_exam_student_results(
        &self,
        exam_id: &str,
        student_id: &str,
        body: &Value,
    ) -> Result<Value, RemoteError> {
        let resp = Self::classify(
            self.client
                .put(self.url(&format!("/internal/exams/{exam_id}/students/{student_id}/results")))
                .json(body)
                .send()
                .await,
        )
        .await?;
        let resp = Self::check_status(resp).await?;
        resp.json().await.map_err(|e| RemoteError::BadResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attendance_post_skips_assistant_flag_when_false() {
        let post = AttendancePost { uid: 1, timestamp: "t".into(), assistant_approved: false };
        let json = serde_json::to_value(&post).unwrap();
        assert!(json.get("assistant_approved").is_none());
    }

    #[test]
    fn attendance_post_includes_assistant_flag_when_true() {
        let post = AttendancePost { uid: 1, timestamp: "t".into(), assistant_approved: true };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["assistant_approved"], true);
    }
}
