//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::notifications::transport::classify_status;
use crate::notifications::{DeliveryError, Payload, PushKeys, PushTransport};
use crate::storage::{NewSlot, NewSpace, SpacebookDatabase};

/// Fixed "current time" used by tests that simulate the clock.
pub const NOW: i64 = 1_760_000_000;

pub async fn test_db() -> SpacebookDatabase {
    SpacebookDatabase::open_in_memory().await.unwrap()
}

/// Create a space with the given free slots.
pub async fn seed_space(db: &SpacebookDatabase, space_id: &str, slot_ids: &[&str]) {
    db.create_space(
        space_id,
        &NewSpace {
            name: format!("Space {space_id}"),
            ..NewSpace::default()
        },
        NOW,
    )
    .await
    .unwrap();
    for slot_id in slot_ids {
        db.create_slot(
            slot_id,
            space_id,
            &NewSlot {
                weekday: "tuesday".to_string(),
                opens_at: "09:00".to_string(),
                closes_at: "11:00".to_string(),
            },
            NOW,
        )
        .await
        .unwrap();
    }
}

/// Mark a slot occupied without any reservation holding it.
pub async fn occupy_slot(db: &SpacebookDatabase, slot_id: &str) {
    sqlx::query("UPDATE slots SET occupied = 1 WHERE id = ?")
        .bind(slot_id)
        .execute(db.pool())
        .await
        .unwrap();
}

/// Insert a pending reservation directly, leaving its slot untouched.
pub async fn insert_pending_row(
    db: &SpacebookDatabase,
    id: &str,
    user_id: &str,
    slot_id: &str,
    created_at: i64,
) {
    sqlx::query(
        "INSERT INTO reservations \
         (id, user_id, space_id, slot_id, start_time, end_time, state, created_at, updated_at) \
         SELECT ?, ?, space_id, id, ?, ?, 'pending', ?, ? FROM slots WHERE id = ?",
    )
    .bind(id)
    .bind(user_id)
    .bind(created_at)
    .bind(created_at + 3600)
    .bind(created_at)
    .bind(created_at)
    .bind(slot_id)
    .execute(db.pool())
    .await
    .unwrap();
}

/// How the fake push service answers one endpoint.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Accept,
    Status(u16),
    Fail,
    Hang,
}

/// In-memory push transport that records every delivery.
#[derive(Default)]
pub struct RecordingTransport {
    behaviors: Mutex<HashMap<String, Behavior>>,
    deliveries: Mutex<Vec<(String, Payload)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, endpoint: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), behavior);
    }

    /// Payloads delivered to `endpoint`, in order.
    pub fn payloads_for(&self, endpoint: &str) -> Vec<Payload> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn deliver(
        &self,
        endpoint: &str,
        _keys: &PushKeys,
        payload: &str,
    ) -> Result<(), DeliveryError> {
        let payload: Payload = serde_json::from_str(payload).unwrap();
        self.deliveries
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload));

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(Behavior::Accept);

        match behavior {
            Behavior::Accept => Ok(()),
            Behavior::Status(code) => classify_status(StatusCode::from_u16(code).unwrap()),
            Behavior::Fail => Err(DeliveryError::Transient("connection reset".to_string())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
