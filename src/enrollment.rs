// SPDX-License-Identifier: Apache-2.0

//! Enrollment Orchestrator (C7): turns a demographic-only candidate into a
//! persisted `Student` with an allocated uid and a fingerprint template
//! (spec §4.7).

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::NaiveDate;
use serde_json::json;

use crate::connectivity::is_online;
use crate::counter::IdAllocator;
use crate::devices::driver::TemplateRecord;
use crate::devices::registry::DeviceRegistry;
use crate::error::CoordinatorError;
use crate::models::{DeviceConfigEntry, MissingStudent, Student};
use crate::remote::RemoteClient;
use crate::store::LocalStore;

/// Demographic-only enrollment request (spec §4.7: "no identifiers").
#[derive(Debug, Clone)]
pub struct EnrollmentCandidate {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: String,
    pub guardian_number: String,
    pub birth_date: Option<NaiveDate>,
    pub national_id: Option<String>,
    pub gender: Option<String>,
    pub level: Option<i32>,
    pub school_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnrollmentOutcome {
    pub student: Student,
    pub online: bool,
    pub device_used: String,
}

pub struct EnrollmentOrchestrator {
    store: Arc<dyn LocalStore>,
    registry: Arc<DeviceRegistry>,
    remote: Arc<RemoteClient>,
    allocator: IdAllocator,
    connect_timeout: Duration,
    probe_timeout: Duration,
}

impl EnrollmentOrchestrator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        registry: Arc<DeviceRegistry>,
        remote: Arc<RemoteClient>,
        allocator: IdAllocator,
        connect_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self { store, registry, remote, allocator, connect_timeout, probe_timeout }
    }

    pub async fn enroll(
        &self,
        candidate: EnrollmentCandidate,
        auth_token: Option<&str>,
    ) -> Result<EnrollmentOutcome, CoordinatorError> {
        let mut online = is_online(self.remote.base_url(), self.probe_timeout).await;

        let (uid, student_id) = if online {
            match self.remote.next_ids(auth_token).await {
                Ok(ids) => {
                    self.allocator.sync(ids.uid - 1).await?;
                    (ids.uid, ids.student_id)
                }
                Err(e) if e.is_offline_signal() => {
                    tracing::warn!(err = %e, "next-ids unreachable, degrading to offline enrollment");
                    online = false;
                    let uid = self.allocator.peek().await?;
                    (uid, uid.to_string())
                }
                Err(e) => return Err(CoordinatorError::RemoteServerError(e.to_string())),
            }
        } else {
            let uid = self.allocator.peek().await?;
            (uid, uid.to_string())
        };

        let full_name = format!("{}_{}", candidate.first_name, candidate.last_name);
        let (template, device_used) = self.enroll_with_retries(uid, &full_name).await?;
        let encoded_template = BASE64.encode(&template.template_bytes);

        let student = Student {
            uid,
            student_id: student_id.clone(),
            first_name: candidate.first_name,
            last_name: candidate.last_name,
            email: candidate.email,
            phone_number: candidate.phone_number,
            guardian_number: candidate.guardian_number,
            birth_date: candidate.birth_date,
            national_id: candidate.national_id,
            gender: candidate.gender,
            level: candidate.level,
            school_name: candidate.school_name,
            is_subscription: true,
            fingerprint_template: Some(encoded_template),
            attendance: Default::default(),
        };

        if online {
            let payload = json!({
                "first_name": student.first_name,
                "last_name": student.last_name,
                "email": student.email,
                "phone_number": student.phone_number,
                "guardian_number": student.guardian_number,
                "birth_date": student.birth_date,
                "national_id": student.national_id,
                "gender": student.gender,
                "level": student.level,
                "school_name": student.school_name,
                "student_id": student.student_id,
                "uid": student.uid,
                "is_subscription": true,
                "fingerprint_template": student.fingerprint_template,
            });

            match self.remote.create_student(&payload, auth_token).await {
                Ok(_) => {
                    self.allocator.increment().await?;
                    self.store.insert_student(student.clone()).await?;
                    return Ok(EnrollmentOutcome { student, online: true, device_used });
                }
                Err(e) if e.is_blacklist_reject() => {
                    self.delete_from_all_devices(uid).await;
                    return Err(CoordinatorError::RemotePolicyReject(format!(
                        "student creation rejected: {e}"
                    )));
                }
                Err(e) if e.is_offline_signal() => {
                    tracing::warn!(err = %e, "remote unreachable while creating student, degrading to offline");
                }
                Err(e) => return Err(CoordinatorError::RemoteServerError(e.to_string())),
            }
        }

        self.store.insert_student(student.clone()).await?;
        self.store.insert_missing_student(MissingStudent::new(student.clone())).await?;
        self.allocator.increment().await?;
        Ok(EnrollmentOutcome { student, online: false, device_used })
    }

    /// Multi-device attempt; on a detected "already enrolled" conflict,
    /// delete the uid from every device and retry once; if that still
    /// fails, fall back to the legacy single default-device path (spec
    /// §4.7). Never advances the counter — the caller does that only after
    /// a full success.
    async fn enroll_with_retries(
        &self,
        uid: i64,
        name: &str,
    ) -> Result<(TemplateRecord, String), CoordinatorError> {
        match self.enroll_multi_device(uid, name).await {
            Ok((template, device)) => return Ok((template, device.device_id)),
            Err(CoordinatorError::DeviceUserExists) => {
                tracing::warn!(uid, "uid already enrolled on a device; deleting and retrying");
                self.delete_from_all_devices(uid).await;
                if let Ok((template, device)) = self.enroll_multi_device(uid, name).await {
                    return Ok((template, device.device_id));
                }
            }
            Err(_) => {}
        }

        tracing::warn!(uid, "multi-device enrollment failed, trying legacy single-device path");
        match self.enroll_legacy(uid, name).await {
            Ok(template) => Ok((template, DeviceConfigEntry::default_entry().device_id)),
            Err(e) => Err(CoordinatorError::DeviceEnrollmentFailed(format!(
                "fingerprint enrollment failed on all devices: {e}"
            ))),
        }
    }

    /// Iterate enabled devices in registry order; return the first success.
    async fn enroll_multi_device(
        &self,
        uid: i64,
        name: &str,
    ) -> Result<(TemplateRecord, DeviceConfigEntry), CoordinatorError> {
        let mut last_err = None;
        for device in self.registry.enabled() {
            match self.enroll_on_device(&device, uid, name).await {
                Ok(template) => return Ok((template, device)),
                Err(CoordinatorError::DeviceUserExists) => return Err(CoordinatorError::DeviceUserExists),
                Err(e) => last_err = Some(format!("{}: {e}", device.device_id)),
            }
        }
        Err(CoordinatorError::DeviceEnrollmentFailed(
            last_err.unwrap_or_else(|| "no enabled devices".to_owned()),
        ))
    }

    async fn enroll_on_device(
        &self,
        device: &DeviceConfigEntry,
        uid: i64,
        name: &str,
    ) -> Result<TemplateRecord, CoordinatorError> {
        let mut handle = self.registry.connect_for_enrollment(&device.device_id, self.connect_timeout).await?;
        handle.disable().await?;
        let result = async {
            handle.set_user(uid, name, 0, "", "", &uid.to_string()).await?;
            handle.enroll(uid, 0).await
        }
        .await;
        let _ = handle.enable().await;
        result
    }

    async fn enroll_legacy(&self, uid: i64, name: &str) -> Result<TemplateRecord, CoordinatorError> {
        let mut handle = self.registry.connect_legacy_default(self.connect_timeout).await?;
        handle.disable().await?;
        if handle.get_user_template(uid, 0).await?.is_some() {
            let _ = handle.delete_user(uid).await;
        }
        handle.set_user(uid, name, 0, "", "", &uid.to_string()).await?;
        let template = handle.enroll(uid, 0).await;
        let _ = handle.enable().await;
        template
    }

    /// Best-effort deletion across every enabled device (spec §4.7, used on
    /// both the "already exists" retry path and a blacklist rejection).
    pub async fn delete_from_all_devices(&self, uid: i64) -> usize {
        let mut deleted = 0;
        for device in self.registry.enabled() {
            match self.registry.connect_for_enrollment(&device.device_id, self.connect_timeout).await {
                Ok(mut handle) => {
                    if handle.delete_user(uid).await.is_ok() {
                        deleted += 1;
                    }
                    let _ = handle.enable().await;
                }
                Err(e) => {
                    tracing::warn!(device_id = %device.device_id, err = %e, "could not connect to delete uid");
                }
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::fake::FakeDriver;
    use crate::store::InMemoryStore;

    fn config(id: &str) -> DeviceConfigEntry {
        DeviceConfigEntry { device_id: id.to_owned(), ip: "127.0.0.1".into(), port: 0, name: id.into(), location: "room".into(), enabled: true }
    }

    fn candidate() -> EnrollmentCandidate {
        EnrollmentCandidate {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: None,
            phone_number: "000".into(),
            guardian_number: String::new(),
            birth_date: None,
            national_id: None,
            gender: None,
            level: None,
            school_name: None,
        }
    }

    fn orchestrator(registry: Arc<DeviceRegistry>) -> EnrollmentOrchestrator {
        let store = InMemoryStore::new();
        let remote = Arc::new(RemoteClient::new("http://127.0.0.1:1", Duration::from_millis(100)));
        let allocator = IdAllocator::new(store.clone());
        EnrollmentOrchestrator::new(
            store,
            registry,
            remote,
            allocator,
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn offline_enrollment_persists_student_and_missing_student() {
        let registry = DeviceRegistry::new(Arc::new(FakeDriver::new()), vec![config("d1")]);
        let orch = orchestrator(registry);

        let outcome = orch.enroll(candidate(), None).await.unwrap();
        assert!(!outcome.online);
        assert_eq!(outcome.device_used, "d1");

        let stored = orch.store.find_student_by_uid(outcome.student.uid).await.unwrap().unwrap();
        assert_eq!(stored.student_id, outcome.student.uid.to_string());
        let missing = orch.store.find_missing_student(outcome.student.uid).await.unwrap();
        assert!(missing.is_some());
    }

    #[tokio::test]
    async fn failed_enrollment_does_not_advance_counter() {
        let driver = FakeDriver::new();
        *driver.state.enroll_should_fail.lock().await = true;
        let registry = DeviceRegistry::new(Arc::new(driver), vec![config("d1")]);
        let orch = orchestrator(registry);

        let before = orch.allocator.peek().await.unwrap();
        let result = orch.enroll(candidate(), None).await;
        assert!(result.is_err());
        let after = orch.allocator.peek().await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn existing_uid_is_deleted_and_retried() {
        let driver = FakeDriver::new();
        let state = driver.state.clone();
        let registry = DeviceRegistry::new(Arc::new(driver), vec![config("d1")]);
        let orch = orchestrator(registry);

        let uid = orch.allocator.peek().await.unwrap();
        state.enrolled.lock().await.insert(
            uid,
            TemplateRecord { uid, finger_index: 0, template_bytes: vec![1, 2, 3] },
        );

        let outcome = orch.enroll(candidate(), None).await.unwrap();
        assert_eq!(outcome.student.uid, uid);
    }
}
