// SPDX-License-Identifier: Apache-2.0

//! Local Store (C3): a thin ownership boundary over a document database.
//!
//! The document-database driver itself is an out-of-scope external
//! collaborator (spec §1) — this module defines the trait the rest of the
//! core depends on, plus an in-memory implementation used by tests and as
//! a reference. A production deployment plugs in an implementation backed
//! by the real store (e.g. mongodb) behind the same trait; the core never
//! assumes multi-document transactions (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::CoordinatorError;
use crate::models::{CaptureLog, Counter, MissingStudent, Student};

/// CRUD + iteration surface the core needs from the local store (spec §4.3).
///
/// Every method is single-document atomic; the sync worker and offline
/// reconciliation restore any cross-document invariant via retry, not via
/// transactions.
#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
    async fn insert_student(&self, student: Student) -> Result<(), CoordinatorError>;
    async fn find_student_by_uid(&self, uid: i64) -> Result<Option<Student>, CoordinatorError>;
    async fn save_student(&self, student: Student) -> Result<(), CoordinatorError>;
    async fn delete_student(&self, uid: i64) -> Result<(), CoordinatorError>;
    /// Newest-first, for `GET /students/` (spec §6).
    async fn list_students(&self, skip: usize, limit: usize) -> Result<Vec<Student>, CoordinatorError>;

    async fn insert_missing_student(&self, m: MissingStudent) -> Result<(), CoordinatorError>;
    async fn save_missing_student(&self, m: MissingStudent) -> Result<(), CoordinatorError>;
    async fn delete_missing_student(&self, uid: i64) -> Result<(), CoordinatorError>;
    async fn find_missing_student(&self, uid: i64) -> Result<Option<MissingStudent>, CoordinatorError>;
    /// Full-collection iteration, used by the sync worker (spec §4.10).
    async fn list_missing_students(&self) -> Result<Vec<MissingStudent>, CoordinatorError>;

    async fn get_counter(&self, name: &str) -> Result<Option<Counter>, CoordinatorError>;
    async fn save_counter(&self, name: &str, counter: Counter) -> Result<(), CoordinatorError>;

    async fn append_capture_log(&self, entry: CaptureLog) -> Result<(), CoordinatorError>;

    /// Students with at least one unsynced `day{N}_offline` entry, used by
    /// the sync worker's offline-attendance drain (spec §4.10).
    async fn list_students_with_unsynced_offline_attendance(
        &self,
    ) -> Result<Vec<Student>, CoordinatorError>;
}

/// In-memory `LocalStore`. Reference implementation and test double; not
/// durable across restarts (a real deployment wires a document-store-backed
/// implementation behind the same trait).
#[derive(Default)]
pub struct InMemoryStore {
    students: RwLock<HashMap<i64, Student>>,
    missing: RwLock<HashMap<i64, MissingStudent>>,
    counters: RwLock<HashMap<String, Counter>>,
    capture_log: RwLock<Vec<CaptureLog>>,
    insertion_seq: RwLock<HashMap<i64, u64>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl LocalStore for InMemoryStore {
    async fn insert_student(&self, student: Student) -> Result<(), CoordinatorError> {
        let seq = self.next_seq();
        self.insertion_seq.write().await.insert(student.uid, seq);
        self.students.write().await.insert(student.uid, student);
        Ok(())
    }

    async fn find_student_by_uid(&self, uid: i64) -> Result<Option<Student>, CoordinatorError> {
        Ok(self.students.read().await.get(&uid).cloned())
    }

    async fn save_student(&self, student: Student) -> Result<(), CoordinatorError> {
        let mut guard = self.students.write().await;
        if !guard.contains_key(&student.uid) {
            let seq = self.next_seq();
            drop(guard);
            self.insertion_seq.write().await.insert(student.uid, seq);
            guard = self.students.write().await;
        }
        guard.insert(student.uid, student);
        Ok(())
    }

    async fn delete_student(&self, uid: i64) -> Result<(), CoordinatorError> {
        self.students.write().await.remove(&uid);
        self.insertion_seq.write().await.remove(&uid);
        Ok(())
    }

    async fn list_students(&self, skip: usize, limit: usize) -> Result<Vec<Student>, CoordinatorError> {
        let students = self.students.read().await;
        let seqs = self.insertion_seq.read().await;
        let mut ordered: Vec<&Student> = students.values().collect();
        ordered.sort_by_key(|s| std::cmp::Reverse(seqs.get(&s.uid).copied().unwrap_or(0)));
        Ok(ordered.into_iter().skip(skip).take(limit).cloned().collect())
    }

    async fn insert_missing_student(&self, m: MissingStudent) -> Result<(), CoordinatorError> {
        self.missing.write().await.insert(m.uid(), m);
        Ok(())
    }

    async fn save_missing_student(&self, m: MissingStudent) -> Result<(), CoordinatorError> {
        self.missing.write().await.insert(m.uid(), m);
        Ok(())
    }

    async fn delete_missing_student(&self, uid: i64) -> Result<(), CoordinatorError> {
        self.missing.write().await.remove(&uid);
        Ok(())
    }

    async fn find_missing_student(&self, uid: i64) -> Result<Option<MissingStudent>, CoordinatorError> {
        Ok(self.missing.read().await.get(&uid).cloned())
    }

    async fn list_missing_students(&self) -> Result<Vec<MissingStudent>, CoordinatorError> {
        Ok(self.missing.read().await.values().cloned().collect())
    }

    async fn get_counter(&self, name: &str) -> Result<Option<Counter>, CoordinatorError> {
        Ok(self.counters.read().await.get(name).copied())
    }

    async fn save_counter(&self, name: &str, counter: Counter) -> Result<(), CoordinatorError> {
        self.counters.write().await.insert(name.to_owned(), counter);
        Ok(())
    }

    async fn append_capture_log(&self, entry: CaptureLog) -> Result<(), CoordinatorError> {
        self.capture_log.write().await.push(entry);
        Ok(())
    }

    async fn list_students_with_unsynced_offline_attendance(
        &self,
    ) -> Result<Vec<Student>, CoordinatorError> {
        use crate::models::AttendanceValue;
        Ok(self
            .students
            .read()
            .await
            .values()
            .filter(|s| {
                s.attendance.values().any(|v| matches!(v, AttendanceValue::Offline(o) if !o.synced))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;

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

    #[tokio::test]
    async fn list_students_is_newest_first() {
        let store = InMemoryStore::new();
        store.insert_student(student(1)).await.unwrap();
        store.insert_student(student(2)).await.unwrap();
        store.insert_student(student(3)).await.unwrap();

        let page = store.list_students(0, 10).await.unwrap();
        let uids: Vec<i64> = page.iter().map(|s| s.uid).collect();
        assert_eq!(uids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn list_students_respects_skip_and_limit() {
        let store = InMemoryStore::new();
        for uid in 1..=5 {
            store.insert_student(student(uid)).await.unwrap();
        }
        let page = store.list_students(1, 2).await.unwrap();
        let uids: Vec<i64> = page.iter().map(|s| s.uid).collect();
        assert_eq!(uids, vec![4, 3]);
    }

    #[tokio::test]
    async fn missing_student_round_trips() {
        let store = InMemoryStore::new();
        let m = MissingStudent::new(student(42));
        store.insert_missing_student(m).await.unwrap();

        let found = store.find_missing_student(42).await.unwrap().unwrap();
        assert_eq!(found.sync_status, SyncStatus::Pending);

        store.delete_missing_student(42).await.unwrap();
        assert!(store.find_missing_student(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_only_students_with_unsynced_offline_entries() {
        use crate::models::{AttendanceValue, OfflineAttendance};

        let store = InMemoryStore::new();
        let mut with_offline = student(1);
        with_offline.attendance.insert(
            "day1_offline".into(),
            AttendanceValue::Offline(OfflineAttendance {
                status: true,
                timestamp: chrono::Utc::now(),
                synced: false,
                device_id: "d1".into(),
                device_name: "D1".into(),
                device_location: "Room".into(),
            }),
        );
        store.insert_student(with_offline).await.unwrap();
        store.insert_student(student(2)).await.unwrap();

        let found = store.list_students_with_unsynced_offline_attendance().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uid, 1);
    }
}
