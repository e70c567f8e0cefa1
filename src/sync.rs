// SPDX-License-Identifier: Apache-2.0

//! Sync Worker (C10): the single long-lived background task that drains
//! the deferred queue — pending `MissingStudent` rows and unsynced offline
//! attendance entries — once the remote becomes reachable (spec §4.10).
//!
//! Grounded closely on the original's `sync_service.py`, adapted to the
//! typed store/remote-client split: the existence-check-before-create
//! discipline is unchanged, but the student payload no longer needs a
//! field-exclude list — `Student` carries no sync metadata to begin with.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::channel::OperatorChannel;
use crate::connectivity::is_online;
use crate::error::CoordinatorError;
use crate::models::{AttendanceValue, SyncStatus};
use crate::remote::{AttendancePost, RemoteClient};
use crate::store::LocalStore;

pub struct SyncWorker {
    store: Arc<dyn LocalStore>,
    remote: Arc<RemoteClient>,
    channel: Arc<OperatorChannel>,
    interval: Duration,
    probe_timeout: Duration,
    max_attempts: u32,
}

impl SyncWorker {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<RemoteClient>,
        channel: Arc<OperatorChannel>,
        interval: Duration,
        probe_timeout: Duration,
        max_attempts: u32,
    ) -> Arc<Self> {
        Arc::new(Self { store, remote, channel, interval, probe_timeout, max_attempts })
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !is_online(self.remote.base_url(), self.probe_timeout).await {
                tracing::debug!("sync worker: remote offline, sleeping");
                if self.sleep_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }

            if let Err(e) = self.run_once().await {
                tracing::warn!(err = %e, "sync pass failed");
            }

            if self.sleep_or_cancel(&cancel).await {
                break;
            }
        }
    }

    async fn sleep_or_cancel(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.interval) => false,
        }
    }

    async fn run_once(&self) -> Result<(), CoordinatorError> {
        self.sync_missing_students().await?;
        self.cleanup_synced_students().await?;
        self.drain_offline_attendance().await?;
        Ok(())
    }

    /// Step 2-4 of spec §4.10: sync every pending/retryable `MissingStudent`.
    async fn sync_missing_students(&self) -> Result<(), CoordinatorError> {
        let candidates = self.store.list_missing_students().await?;
        for mut m in candidates {
            let retryable = m.sync_status == SyncStatus::Pending
                || (m.sync_status == SyncStatus::Failed && m.sync_attempts < self.max_attempts);
            if !retryable {
                continue;
            }

            m.sync_status = SyncStatus::Syncing;
            m.last_sync_attempt = Some(Utc::now());
            self.store.save_missing_student(m.clone()).await?;

            match self.remote.get_student(m.uid()).await {
                Ok(Some(_)) => {
                    // Already exists remotely (idempotency check, spec I3).
                    m.sync_status = SyncStatus::Synced;
                    m.synced_at = Some(Utc::now());
                    self.store.save_missing_student(m.clone()).await?;
                    self.store.delete_missing_student(m.uid()).await?;
                    continue;
                }
                Ok(None) => {
                    let payload = serde_json::to_value(&m.student)
                        .map_err(|e| CoordinatorError::LocalStore(e.to_string()))?;
                    match self.remote.create_student(&payload, None).await {
                        Ok(_) => {
                            m.sync_status = SyncStatus::Synced;
                            m.synced_at = Some(Utc::now());
                            self.store.save_missing_student(m.clone()).await?;
                            self.store.delete_missing_student(m.uid()).await?;
                            continue;
                        }
                        Err(e) => {
                            m.sync_status = SyncStatus::Failed;
                            m.sync_error = Some(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    m.sync_status = SyncStatus::Failed;
                    m.sync_error = Some(e.to_string());
                }
            }

            m.sync_attempts += 1;
            self.store.save_missing_student(m).await?;
        }
        Ok(())
    }

    /// Step 5: sweep rows stuck at `synced` (a crash between save and
    /// delete never leaves a hole, only a harmless duplicate to clean up).
    async fn cleanup_synced_students(&self) -> Result<(), CoordinatorError> {
        for m in self.store.list_missing_students().await? {
            if m.sync_status == SyncStatus::Synced {
                self.store.delete_missing_student(m.uid()).await?;
            }
        }
        Ok(())
    }

    /// Step 6: drain unsynced `day{N}_offline` entries.
    async fn drain_offline_attendance(&self) -> Result<(), CoordinatorError> {
        for mut student in self.store.list_students_with_unsynced_offline_attendance().await? {
            let offline_keys: Vec<String> = student
                .attendance
                .iter()
                .filter(|(_, v)| matches!(v, AttendanceValue::Offline(o) if !o.synced))
                .map(|(k, _)| k.clone())
                .collect();

            for key in offline_keys {
                let Some(AttendanceValue::Offline(record)) = student.attendance.get(&key).cloned() else {
                    continue;
                };
                let post = AttendancePost {
                    uid: student.uid,
                    timestamp: record.timestamp.to_rfc3339(),
                    assistant_approved: false,
                };

                match self.remote.post_attendance(&post).await {
                    Ok(_) => {
                        let new_key = key.trim_end_matches("_offline").to_owned();
                        student.attendance.remove(&key);
                        student.attendance.insert(new_key, AttendanceValue::Validated(true));
                    }
                    Err(e) if e.is_schedule_reject() || e.is_blacklist_reject() => {
                        tracing::info!(uid = student.uid, key = %key, "offline attendance dropped on policy rejection");
                        student.attendance.remove(&key);
                        self.channel.capture_rejected(student.uid, &e.to_string()).await;
                    }
                    Err(e) if e.is_offline_signal() => {
                        // Leave for a later pass.
                    }
                    Err(e) => {
                        tracing::warn!(uid = student.uid, key = %key, err = %e, "offline attendance sync deferred");
                    }
                }
            }

            self.store.save_student(student).await?;
        }
        Ok(())
    }
}
