// SPDX-License-Identifier: Apache-2.0

//! Identifier Allocator (C6): the `student_sequence` counter (spec §4.6).
//!
//! `peek` → `increment` is a deliberately non-atomic discipline: `peek`
//! reserves an id tentatively, `increment` burns it, and it is only ever
//! called after the corresponding enrollment has durably committed. This
//! is what prevents id holes from aborted attempts (spec I2).

use std::sync::Arc;

use crate::error::CoordinatorError;
use crate::models::{Counter, COUNTER_INITIAL_VALUE, MAX_UID};
use crate::store::LocalStore;

pub const COUNTER_NAME: &str = "student_sequence";

#[derive(Clone)]
pub struct IdAllocator {
    store: Arc<dyn LocalStore>,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    async fn current(&self) -> Result<Counter, CoordinatorError> {
        match self.store.get_counter(COUNTER_NAME).await {
            Ok(Some(c)) => Ok(c),
            Ok(None) => {
                let c = Counter { value: COUNTER_INITIAL_VALUE };
                self.store.save_counter(COUNTER_NAME, c).await?;
                Ok(c)
            }
            Err(e) => {
                let fallback = Self::fallback_id(chrono::Utc::now().timestamp());
                tracing::warn!(err = %e, fallback, "counter store unreachable, using time-derived fallback id");
                Ok(Counter { value: fallback - 1 })
            }
        }
    }

    /// Compute the next id without advancing the counter.
    pub async fn peek(&self) -> Result<i64, CoordinatorError> {
        let counter = self.current().await?;
        let next = counter.value + 1;
        if next > MAX_UID {
            return Err(CoordinatorError::CounterExhausted);
        }
        Ok(next)
    }

    /// Advance the counter by one. Call only after the id a prior `peek`
    /// produced has been durably committed.
    pub async fn increment(&self) -> Result<i64, CoordinatorError> {
        let counter = self.current().await?;
        let next = counter.value + 1;
        if next > MAX_UID {
            return Err(CoordinatorError::CounterExhausted);
        }
        if let Err(e) = self.store.save_counter(COUNTER_NAME, Counter { value: next }).await {
            tracing::warn!(err = %e, value = next, "failed to persist incremented counter");
            return Err(e);
        }
        tracing::info!(value = next, "student counter incremented");
        Ok(next)
    }

    /// Set the counter so that the next `peek()` returns `remote_uid + 1`
    /// (spec §4.6, §9 — resolves the two divergent source variants).
    pub async fn sync(&self, remote_uid: i64) -> Result<(), CoordinatorError> {
        self.store.save_counter(COUNTER_NAME, Counter { value: remote_uid }).await?;
        tracing::info!(remote_uid, "local counter synced to remote");
        Ok(())
    }

    /// Admin reset (spec §6 `POST /students/init-counter`).
    pub async fn initialize(&self, start_value: i64) -> Result<(), CoordinatorError> {
        self.store.save_counter(COUNTER_NAME, Counter { value: start_value }).await?;
        tracing::info!(start_value, "student counter initialized");
        Ok(())
    }

    /// Deterministic fallback id when the counter store itself cannot be
    /// read or written (spec §11 supplement, grounded in the original's
    /// time-derived fallback). Never used for an ordinary `CounterExhausted`.
    pub fn fallback_id(now_unix_secs: i64) -> i64 {
        (now_unix_secs % 100_000) + 20_000
    }
}
