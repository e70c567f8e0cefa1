// SPDX-License-Identifier: Apache-2.0

//! Operator Channel (C11): the push-channel subscriber set (spec §4.11).
//!
//! Two message shapes share one UTF-8 text stream: a structured `{type,
//! ...}` envelope for decision events, and a line-formatted string for
//! every other broadcast. The channel owns the subscriber set and evicts
//! any subscriber whose send fails, mirroring the teacher's broadcast hub.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A single live operator connection's outbound half.
pub type Subscriber = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct OperatorChannel {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl OperatorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().await.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Send `message` to every live subscriber, evicting any whose channel
    /// is closed (spec §5 "if a send to a subscriber fails, that subscriber
    /// is evicted").
    async fn broadcast_line(&self, message: String) {
        let mut dead = Vec::new();
        {
            let guard = self.subscribers.read().await;
            for (id, tx) in guard.iter() {
                if tx.send(message.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut guard = self.subscribers.write().await;
            for id in dead {
                guard.remove(&id);
            }
        }
    }

    async fn broadcast_envelope(&self, envelope: Value) {
        self.broadcast_line(envelope.to_string()).await;
    }

    pub async fn capture_approved(&self, uid: i64) {
        self.broadcast_line(format!("APPROVED UID={uid}")).await;
    }

    pub async fn capture_rejected(&self, uid: i64, reason: &str) {
        self.broadcast_line(format!("REJECTED UID={uid} REASON={reason}")).await;
    }

    pub async fn offline_capture(&self, uid: i64) {
        self.broadcast_line(format!("OFFLINE_CAPTURE UID={uid}")).await;
    }

    pub async fn assistant_approved(&self, uid: i64) {
        self.broadcast_line(format!("ASSISTANT APPROVED UID={uid}")).await;
    }

    pub async fn assistant_rejected(&self, uid: i64) {
        self.broadcast_line(format!("ASSISTANT REJECTED UID={uid}")).await;
    }

    pub async fn decision_request(&self, decision_id: &str, uid: i64, reason: &str, device_id: &str) {
        self.broadcast_envelope(serde_json::json!({
            "type": "decision_request",
            "decision_id": decision_id,
            "uid": uid,
            "reason": reason,
            "device_id": device_id,
        }))
        .await;
    }

    pub async fn device_error(&self, device_id: &str, message: &str) {
        self.broadcast_line(format!("DEVICE_ERROR DEVICE={device_id} MESSAGE={message}")).await;
    }

    pub async fn local_store_error(&self, context: &str, message: &str) {
        self.broadcast_line(format!("LOCAL_STORE_ERROR CONTEXT={context} MESSAGE={message}")).await;
    }
}
