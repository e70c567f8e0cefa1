// SPDX-License-Identifier: Apache-2.0

//! In-memory fake [`ScannerDriver`]/[`DeviceHandle`] for tests — stands in
//! for real hardware the same way [`crate::store::InMemoryStore`] stands in
//! for the document database (both are out-of-scope external collaborators
//! per spec §1).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::driver::{CaptureEvent, DeviceHandle, ScannerDriver, TemplateRecord, UserRecord};
use crate::error::CoordinatorError;

#[derive(Clone, Default)]
pub struct FakeDeviceState {
    pub enrolled: Arc<Mutex<HashMap<i64, TemplateRecord>>>,
    pub enroll_should_fail: Arc<Mutex<bool>>,
    pub connect_should_fail: Arc<Mutex<bool>>,
    pub captures: Arc<Mutex<Vec<CaptureEvent>>>,
}

/// A `ScannerDriver` whose behavior is entirely controlled by test code via
/// shared [`FakeDeviceState`].
pub struct FakeDriver {
    pub state: FakeDeviceState,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self { state: FakeDeviceState::default() }
    }
}

#[async_trait::async_trait]
impl ScannerDriver for FakeDriver {
    async fn connect(
        &self,
        _ip: &str,
        _port: u16,
        _timeout: std::time::Duration,
    ) -> Result<Box<dyn DeviceHandle>, CoordinatorError> {
        if *self.state.connect_should_fail.lock().await {
            return Err(CoordinatorError::DeviceConnection("fake connect failure".into()));
        }
        Ok(Box::new(FakeHandle { state: self.state.clone() }))
    }
}

struct FakeHandle {
    state: FakeDeviceState,
}

#[async_trait::async_trait]
impl DeviceHandle for FakeHandle {
    async fn disable(&mut self) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn enable(&mut self) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn list_users(&mut self) -> Result<Vec<UserRecord>, CoordinatorError> {
        Ok(Vec::new())
    }

    async fn delete_user(&mut self, uid: i64) -> Result<(), CoordinatorError> {
        self.state.enrolled.lock().await.remove(&uid);
        Ok(())
    }

    async fn set_user(
        &mut self,
        _uid: i64,
        _name: &str,
        _privilege: u8,
        _password: &str,
        _group_id: &str,
        _user_id: &str,
    ) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn enroll(&mut self, uid: i64, finger_index: u8) -> Result<TemplateRecord, CoordinatorError> {
        if self.state.enrolled.lock().await.contains_key(&uid) {
            return Err(CoordinatorError::DeviceUserExists);
        }
        if *self.state.enroll_should_fail.lock().await {
            return Err(CoordinatorError::DeviceEnrollmentTimeout);
        }
        let record = TemplateRecord { uid, finger_index, template_bytes: vec![uid as u8; 8] };
        self.state.enrolled.lock().await.insert(uid, record.clone());
        Ok(record)
    }

    async fn get_user_template(
        &mut self,
        uid: i64,
        _finger_index: u8,
    ) -> Result<Option<TemplateRecord>, CoordinatorError> {
        Ok(self.state.enrolled.lock().await.get(&uid).cloned())
    }

    async fn next_capture(
        &mut self,
        cancelled: &tokio_util::sync::CancellationToken,
    ) -> Result<Option<CaptureEvent>, CoordinatorError> {
        loop {
            if cancelled.is_cancelled() {
                return Ok(None);
            }
            let next = self.state.captures.lock().await.pop();
            if let Some(event) = next {
                return Ok(Some(event));
            }
            tokio::select! {
                _ = cancelled.cancelled() => return Ok(None),
                _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
            }
        }
    }

    async fn identify_user(&mut self) -> Result<Option<UserRecord>, CoordinatorError> {
        Ok(None)
    }
}
