// SPDX-License-Identifier: Apache-2.0

//! Decision Arbiter (C9): operator-in-the-loop resolution of remote
//! schedule-policy rejections (spec §4.9).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::channel::OperatorChannel;
use crate::error::CoordinatorError;
use crate::models::{AttendanceValue, OfflineAttendance, PendingDecision, Student};
use crate::remote::{AttendancePost, RemoteClient};
use crate::store::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
}

/// In-memory `decision_id → PendingDecision` map. Restart discards all
/// pending decisions (spec §4.9, I6) — this is documented, not recovered.
pub struct DecisionArbiter {
    store: Arc<dyn LocalStore>,
    remote: Arc<RemoteClient>,
    channel: Arc<OperatorChannel>,
    pending: RwLock<HashMap<String, PendingDecision>>,
}

impl DecisionArbiter {
    pub fn new(store: Arc<dyn LocalStore>, remote: Arc<RemoteClient>, channel: Arc<OperatorChannel>) -> Self {
        Self { store, remote, channel, pending: RwLock::new(HashMap::new()) }
    }

    /// Entry point from C8 on a schedule-policy rejection.
    pub async fn create(
        &self,
        uid: i64,
        student_snapshot: Student,
        reason: String,
        device_id: String,
        device_name: String,
        device_location: String,
    ) -> String {
        let decision_id = PendingDecision::new_id(uid);
        let decision = PendingDecision {
            decision_id: decision_id.clone(),
            uid,
            student_snapshot,
            timestamp: Utc::now(),
            reason: reason.clone(),
            device_id: device_id.clone(),
            device_name,
            device_location,
        };
        self.pending.write().await.insert(decision_id.clone(), decision);
        self.channel.decision_request(&decision_id, uid, &reason, &device_id).await;
        decision_id
    }

    pub async fn list(&self) -> Vec<PendingDecision> {
        self.pending.read().await.values().cloned().collect()
    }

    /// Resolve a pending decision with an operator verdict (spec §4.9).
    /// `approve` appends the attendance entry locally and re-POSTs with
    /// `assistant_approved=true`, bypassing remote schedule validation.
    pub async fn resolve(
        &self,
        decision_id: &str,
        verdict: Verdict,
        auth_token: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let decision = self
            .pending
            .write()
            .await
            .remove(decision_id)
            .ok_or(CoordinatorError::DecisionNotFound)?;

        match verdict {
            Verdict::Reject => {
                self.channel.assistant_rejected(decision.uid).await;
                Ok(())
            }
            Verdict::Approve => {
                let mut student = self
                    .store
                    .find_student_by_uid(decision.uid)
                    .await?
                    .unwrap_or(decision.student_snapshot);

                let day_index = student.next_day_index();
                student.attendance.insert(format!("day{day_index}"), AttendanceValue::Validated(true));
                self.store.save_student(student).await?;

                let post = AttendancePost {
                    uid: decision.uid,
                    timestamp: decision.timestamp.to_rfc3339(),
                    assistant_approved: true,
                };
                if let Err(e) = self.remote.post_attendance(&post).await {
                    tracing::warn!(uid = decision.uid, err = %e, "assistant-approved attendance post failed");
                }

                self.channel.assistant_approved(decision.uid).await;
                Ok(())
            }
        }
    }
}

/// Build the offline attendance value recorded when C8 cannot reach the
/// remote for a live capture (spec §4.8). Shared with the sync worker's
/// drain step. `tz` generalizes the original's hardcoded `Africa/Cairo`
/// stamp (spec §11 supplement) — the stored instant is always UTC, `tz`
/// only affects the local-time value written to the trace log.
pub fn offline_attendance_value(
    device_id: &str,
    device_name: &str,
    device_location: &str,
    tz: chrono_tz::Tz,
) -> AttendanceValue {
    let now = Utc::now();
    tracing::info!(local_time = %now.with_timezone(&tz), device_id, "stamping offline attendance");
    AttendanceValue::Offline(OfflineAttendance {
        status: true,
        timestamp: now,
        synced: false,
        device_id: device_id.to_owned(),
        device_name: device_name.to_owned(),
        device_location: device_location.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn student(uid: i64) -> Student {
        Student {
            uid,
            student_id: uid.to_string(),
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
        }
    }

    fn arbiter() -> (Arc<InMemoryStore>, DecisionArbiter) {
        let store = InMemoryStore::new();
        let remote = Arc::new(RemoteClient::new("http://127.0.0.1:1", Duration::from_millis(50)));
        let channel = Arc::new(OperatorChannel::new());
        let arbiter = DecisionArbiter::new(store.clone(), remote, channel);
        (store, arbiter)
    }

    #[tokio::test]
    async fn unknown_decision_id_fails() {
        let (_store, arbiter) = arbiter();
        let result = arbiter.resolve("nope", Verdict::Approve, None).await;
        assert!(matches!(result, Err(CoordinatorError::DecisionNotFound)));
    }

    #[tokio::test]
    async fn reject_discards_without_persisting() {
        let (store, arbiter) = arbiter();
        store.insert_student(student(10019)).await.unwrap();
        let id = arbiter
            .create(10019, student(10019), "not allowed on Monday".into(), "d1".into(), "D1".into(), "Room".into())
            .await;

        arbiter.resolve(&id, Verdict::Reject, None).await.unwrap();
        assert!(arbiter.list().await.is_empty());
        let stored = store.find_student_by_uid(10019).await.unwrap().unwrap();
        assert!(stored.attendance.is_empty());
    }

    #[tokio::test]
    async fn approve_appends_attendance_and_clears_entry() {
        let (store, arbiter) = arbiter();
        store.insert_student(student(10019)).await.unwrap();
        let id = arbiter
            .create(10019, student(10019), "not allowed on Monday".into(), "d1".into(), "D1".into(), "Room".into())
            .await;

        arbiter.resolve(&id, Verdict::Approve, None).await.unwrap();
        assert!(arbiter.list().await.is_empty());
        let stored = store.find_student_by_uid(10019).await.unwrap().unwrap();
        assert_eq!(stored.attendance.get("day1"), Some(&AttendanceValue::Validated(true)));
    }
}
