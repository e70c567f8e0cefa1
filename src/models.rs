// SPDX-License-Identifier: Apache-2.0

//! Core data model (spec §3): `Student`, `MissingStudent`, `Counter`,
//! `CaptureLog`, `Device`, `PendingDecision`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on allocated uids (spec §3, `Counter` invariant).
pub const MAX_UID: i64 = 60_000;

/// The counter's starting value before any allocation has happened.
pub const COUNTER_INITIAL_VALUE: i64 = 10_018;

/// An online-validated or offline-captured attendance entry for one day-key.
///
/// Modeled as a tagged variant rather than the original's untagged
/// bool-or-object union (spec §9): the `_offline` key suffix is the tag
/// that selects which shape is expected, but the Rust type itself is
/// explicit about which case it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttendanceValue {
    /// A remote-validated attendance event: `day{N}` = `true`.
    Validated(bool),
    /// An offline-captured event awaiting sync: `day{N}_offline` = record.
    Offline(OfflineAttendance),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAttendance {
    pub status: bool,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
    pub device_id: String,
    pub device_name: String,
    pub device_location: String,
}

/// The canonical local student record (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    /// Globally unique across edge + remote. Once set, never reassigned.
    pub uid: i64,
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub phone_number: String,
    #[serde(default)]
    pub guardian_number: String,
    #[serde(default)]
    pub birth_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub school_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_subscription: bool,
    /// Opaque fingerprint template, base64-encoded for transport.
    #[serde(default)]
    pub fingerprint_template: Option<String>,
    /// day-key → value; keys are `day{N}` (validated) or `day{N}_offline`.
    #[serde(default)]
    pub attendance: BTreeMap<String, AttendanceValue>,
}

fn default_true() -> bool {
    true
}

impl Student {
    /// The smallest unused `day{N}` index, counting both validated and
    /// offline entries (spec §4.8: "counting existing entries ... smallest
    /// unused").
    pub fn next_day_index(&self) -> u32 {
        let mut n = 1;
        loop {
            let validated = self.attendance.contains_key(&format!("day{n}"));
            let offline = self.attendance.contains_key(&format!("day{n}_offline"));
            if !validated && !offline {
                return n;
            }
            n += 1;
        }
    }
}

/// Sync-queue status for a `MissingStudent` row (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    Invalid,
}

/// Mirror of `Student` enriched with sync metadata (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingStudent {
    pub student: Student,
    pub sync_status: SyncStatus,
    pub sync_attempts: u32,
    #[serde(default)]
    pub last_sync_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_error: Option<String>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    pub created_offline_at: DateTime<Utc>,
}

impl MissingStudent {
    pub fn new(student: Student) -> Self {
        Self {
            student,
            sync_status: SyncStatus::Pending,
            sync_attempts: 0,
            last_sync_attempt: None,
            sync_error: None,
            synced_at: None,
            created_offline_at: Utc::now(),
        }
    }

    pub fn uid(&self) -> i64 {
        self.student.uid
    }
}

/// Named monotonic counter used for identifier allocation (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
}

/// Append-only audit record of a raw capture event (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureLog {
    pub student_uid: i64,
    pub timestamp: DateTime<Utc>,
}

/// Device connection/runtime status (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
    Connecting,
}

/// Static device configuration, loaded once at startup (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    pub device_id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_device_location")]
    pub location: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_device_name() -> String {
    "device".to_owned()
}

fn default_device_location() -> String {
    "unknown".to_owned()
}

impl DeviceConfigEntry {
    /// The single default entry used when the device config file is
    /// missing (spec §6).
    pub fn default_entry() -> Self {
        Self {
            device_id: "default".to_owned(),
            ip: "192.168.1.201".to_owned(),
            port: 4370,
            name: "Default Device".to_owned(),
            location: "Main Location".to_owned(),
            enabled: true,
        }
    }
}

/// Runtime status for one device, independent of its static config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRuntime {
    pub status: DeviceStatus,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Default for DeviceRuntime {
    fn default() -> Self {
        Self { status: DeviceStatus::Offline, last_heartbeat: None, error_message: None }
    }
}

/// An operator decision awaiting a verdict (spec §3). In-memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDecision {
    pub decision_id: String,
    pub uid: i64,
    pub student_snapshot: Student,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub device_id: String,
    pub device_name: String,
    pub device_location: String,
}

impl PendingDecision {
    pub fn new_id(uid: i64) -> String {
        format!("{uid}_{}", Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(attendance: &[(&str, AttendanceValue)]) -> Student {
        Student {
            uid: 1,
            student_id: "1".into(),
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
            attendance: attendance.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn next_day_index_starts_at_one() {
        assert_eq!(student(&[]).next_day_index(), 1);
    }

    #[test]
    fn next_day_index_skips_validated_and_offline() {
        let s = student(&[
            ("day1", AttendanceValue::Validated(true)),
            (
                "day2_offline",
                AttendanceValue::Offline(OfflineAttendance {
                    status: true,
                    timestamp: Utc::now(),
                    synced: false,
                    device_id: "d1".into(),
                    device_name: "D1".into(),
                    device_location: "Room".into(),
                }),
            ),
        ]);
        assert_eq!(s.next_day_index(), 3);
    }

    #[test]
    fn attendance_value_round_trips_through_json() {
        let validated = AttendanceValue::Validated(true);
        let json = serde_json::to_string(&validated).unwrap();
        assert_eq!(json, "true");
        let back: AttendanceValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, validated);

        let offline = AttendanceValue::Offline(OfflineAttendance {
            status: true,
            timestamp: Utc::now(),
            synced: false,
            device_id: "d1".into(),
            device_name: "D1".into(),
            device_location: "Room".into(),
        });
        let json = serde_json::to_string(&offline).unwrap();
        let back: AttendanceValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, offline);
    }
}
