// SPDX-License-Identifier: Apache-2.0

//! Attendance Orchestrator (C8): one capture loop per enabled device,
//! consuming the `next_capture` stream and routing each event through the
//! online/offline/policy-rejection state machine (spec §4.8).

use std::sync::Arc;

use crate::channel::OperatorChannel;
use crate::decisions::{offline_attendance_value, DecisionArbiter};
use crate::devices::driver::CaptureEvent;
use crate::devices::registry::{CaptureCallback, DeviceRegistry};
use crate::error::RemoteError;
use crate::models::{AttendanceValue, CaptureLog};
use crate::remote::{AttendancePost, RemoteClient};
use crate::store::LocalStore;

pub struct AttendanceOrchestrator {
    store: Arc<dyn LocalStore>,
    registry: Arc<DeviceRegistry>,
    remote: Arc<RemoteClient>,
    channel: Arc<OperatorChannel>,
    arbiter: Arc<DecisionArbiter>,
    tz: chrono_tz::Tz,
}

impl AttendanceOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn LocalStore>,
        registry: Arc<DeviceRegistry>,
        remote: Arc<RemoteClient>,
        channel: Arc<OperatorChannel>,
        arbiter: Arc<DecisionArbiter>,
        tz: chrono_tz::Tz,
    ) -> Arc<Self> {
        Arc::new(Self { store, registry, remote, channel, arbiter, tz })
    }

    /// The callback handed to [`DeviceRegistry::start_all`].
    pub fn capture_callback(self: &Arc<Self>) -> CaptureCallback {
        let orchestrator = Arc::clone(self);
        Arc::new(move |device_id: String, event: CaptureEvent| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                orchestrator.handle_capture(device_id, event).await;
            })
        })
    }

    async fn handle_capture(&self, device_id: String, event: CaptureEvent) {
        if let Err(e) = self
            .store
            .append_capture_log(CaptureLog { student_uid: event.uid, timestamp: event.device_timestamp })
            .await
        {
            tracing::warn!(uid = event.uid, err = %e, "failed to append capture log");
            self.channel.local_store_error("capture_log", &e.to_string()).await;
        }

        let Some(mut student) = (match self.store.find_student_by_uid(event.uid).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(uid = event.uid, err = %e, "failed to load student for capture");
                self.channel.local_store_error("find_student", &e.to_string()).await;
                return;
            }
        }) else {
            tracing::warn!(uid = event.uid, "capture for unknown uid, ignoring");
            return;
        };

        let (device_name, device_location) = match self.registry.get(&device_id) {
            Some(cfg) => (cfg.name, cfg.location),
            None => (device_id.clone(), "unknown".to_owned()),
        };

        let post = AttendancePost {
            uid: event.uid,
            timestamp: event.device_timestamp.to_rfc3339(),
            assistant_approved: false,
        };

        match self.remote.post_attendance(&post).await {
            Ok(_) => {
                let day = student.next_day_index();
                student.attendance.insert(format!("day{day}"), AttendanceValue::Validated(true));
                self.persist(student).await;
                self.channel.capture_approved(event.uid).await;
            }
            Err(e) if e.is_offline_signal() => {
                let day = student.next_day_index();
                student.attendance.insert(
                    format!("day{day}_offline"),
                    offline_attendance_value(&device_id, &device_name, &device_location, self.tz),
                );
                self.persist(student).await;
                self.channel.offline_capture(event.uid).await;
            }
            Err(e) if e.is_schedule_reject() => {
                let reason = reject_reason(&e);
                self.arbiter
                    .create(event.uid, student, reason, device_id, device_name, device_location)
                    .await;
            }
            Err(e) => {
                tracing::warn!(uid = event.uid, err = %e, "attendance post rejected by remote");
                self.channel.capture_rejected(event.uid, &e.to_string()).await;
            }
        }
    }

    async fn persist(&self, student: crate::models::Student) {
        let uid = student.uid;
        if let Err(e) = self.store.save_student(student).await {
            tracing::warn!(uid, err = %e, "failed to persist attendance after remote decision");
            self.channel.local_store_error("save_student", &e.to_string()).await;
        }
    }
}

fn reject_reason(e: &RemoteError) -> String {
    match e {
        RemoteError::RemoteError { body, .. } => body.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::driver::CaptureEvent;
    use crate::models::{DeviceConfigEntry, Student};
    use crate::store::InMemoryStore;
    use chrono::Utc;
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

    fn orchestrator(remote_url: &str) -> (Arc<InMemoryStore>, Arc<AttendanceOrchestrator>) {
        let store = InMemoryStore::new();
        let registry = DeviceRegistry::new(
            Arc::new(crate::devices::fake::FakeDriver::new()),
            vec![DeviceConfigEntry { device_id: "d1".into(), ip: "127.0.0.1".into(), port: 0, name: "D1".into(), location: "Room".into(), enabled: true }],
        );
        let remote = Arc::new(RemoteClient::new(remote_url, Duration::from_millis(100)));
        let channel = Arc::new(OperatorChannel::new());
        let arbiter = Arc::new(DecisionArbiter::new(store.clone(), remote.clone(), channel.clone()));
        (store.clone(), AttendanceOrchestrator::new(store, registry, remote, channel, arbiter, chrono_tz::UTC))
    }

    #[tokio::test]
    async fn transport_failure_routes_to_offline_path() {
        let (store, orch) = orchestrator("http://127.0.0.1:1");
        store.insert_student(student(10019)).await.unwrap();

        orch.handle_capture("d1".into(), CaptureEvent { uid: 10019, device_timestamp: Utc::now() }).await;

        let stored = store.find_student_by_uid(10019).await.unwrap().unwrap();
        let value = stored.attendance.get("day1_offline").unwrap();
        assert!(matches!(value, AttendanceValue::Offline(_)));
    }

    #[tokio::test]
    async fn capture_for_unknown_uid_is_ignored() {
        let (store, orch) = orchestrator("http://127.0.0.1:1");
        orch.handle_capture("d1".into(), CaptureEvent { uid: 99999, device_timestamp: Utc::now() }).await;
        assert!(store.find_student_by_uid(99999).await.unwrap().is_none());
    }
}
