//! Slot ledger: claiming and releasing bookable slots.
//!
//! A claim takes the slot and writes its pending reservation in one storage
//! transaction, so a reservation never exists without its slot. A release
//! only frees a slot no live reservation still holds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spacebook_core::db::DatabaseError;
use tracing::{debug, error, info, instrument, warn};

use super::BookingError;
use crate::storage::{ClaimOutcome, NewReservation, Penalty, Reservation, Slot, SpacebookDatabase};

/// Default delay before the second release attempt; doubles afterwards.
const RELEASE_BACKOFF: Duration = Duration::from_millis(100);

/// Storage operations the ledger depends on.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn slot(&self, slot_id: &str) -> Result<Option<Slot>, DatabaseError>;

    /// The user's effective penalization at `now`, if any.
    async fn active_penalty(
        &self,
        user_id: &str,
        now: i64,
    ) -> Result<Option<Penalty>, DatabaseError>;

    /// Atomically occupy the slot and insert the pending reservation.
    async fn claim(
        &self,
        reservation: &NewReservation,
        now: i64,
    ) -> Result<ClaimOutcome, DatabaseError>;

    /// Free the slot unless a live reservation holds it; `true` if freed.
    async fn free(&self, slot_id: &str) -> Result<bool, DatabaseError>;
}

#[async_trait]
impl SlotStore for SpacebookDatabase {
    async fn slot(&self, slot_id: &str) -> Result<Option<Slot>, DatabaseError> {
        self.get_slot(slot_id).await
    }

    async fn active_penalty(
        &self,
        user_id: &str,
        now: i64,
    ) -> Result<Option<Penalty>, DatabaseError> {
        self.effective_penalty(user_id, now).await
    }

    async fn claim(
        &self,
        reservation: &NewReservation,
        now: i64,
    ) -> Result<ClaimOutcome, DatabaseError> {
        self.claim_slot(reservation, now).await
    }

    async fn free(&self, slot_id: &str) -> Result<bool, DatabaseError> {
        self.release_slot(slot_id).await
    }
}

/// A booking request for one slot.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub slot_id: String,
    pub user_id: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Claims and releases slots.
#[derive(Clone)]
pub struct SlotLedger {
    store: Arc<dyn SlotStore>,
    release_attempts: u32,
    release_backoff: Duration,
}

impl SlotLedger {
    pub fn new(store: Arc<dyn SlotStore>, release_attempts: u32) -> Self {
        Self {
            store,
            release_attempts: release_attempts.max(1),
            release_backoff: RELEASE_BACKOFF,
        }
    }

    #[must_use]
    pub const fn with_release_backoff(mut self, backoff: Duration) -> Self {
        self.release_backoff = backoff;
        self
    }

    /// Claim a slot for a user, creating a `pending` reservation.
    ///
    /// # Errors
    ///
    /// - `SlotNotFound` if the slot does not exist
    /// - `UserPenalized` if the user has an effective penalization at `now`
    /// - `SlotAlreadyOccupied` if another reservation holds the slot
    /// - `SpaceUnavailable` if an administrator has closed the slot's space
    /// - `Persistence` if the claim could not be written; nothing is kept
    #[instrument(skip(self, request), fields(slot_id = %request.slot_id, user_id = %request.user_id))]
    pub async fn claim(
        &self,
        request: &ClaimRequest,
        now: i64,
    ) -> Result<Reservation, BookingError> {
        let slot = self
            .store
            .slot(&request.slot_id)
            .await?
            .ok_or_else(|| BookingError::SlotNotFound(request.slot_id.clone()))?;

        if let Some(penalty) = self.store.active_penalty(&request.user_id, now).await? {
            info!(penalty_id = %penalty.id, until = penalty.ends_at, "Claim refused: user penalized");
            return Err(BookingError::UserPenalized {
                user_id: request.user_id.clone(),
                until: penalty.ends_at,
            });
        }

        if slot.occupied {
            return Err(BookingError::SlotAlreadyOccupied(slot.id));
        }

        let outcome = self
            .store
            .claim(
                &NewReservation {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: request.user_id.clone(),
                    space_id: slot.space_id.clone(),
                    slot_id: slot.id.clone(),
                    start_time: request.start_time,
                    end_time: request.end_time,
                },
                now,
            )
            .await?;

        match outcome {
            ClaimOutcome::Claimed(reservation) => {
                info!(reservation_id = %reservation.id, space_id = %slot.space_id, "Slot claimed");
                Ok(reservation)
            }
            ClaimOutcome::SlotTaken => {
                info!("Claim lost the race for the slot");
                Err(BookingError::SlotAlreadyOccupied(slot.id))
            }
            ClaimOutcome::SpaceClosed => {
                info!(space_id = %slot.space_id, "Claim refused: space closed");
                Err(BookingError::SpaceUnavailable(slot.space_id))
            }
            ClaimOutcome::SlotMissing => Err(BookingError::SlotNotFound(slot.id)),
        }
    }

    /// Free a slot. Idempotent and best-effort: failures are retried with
    /// exponential backoff and then logged, never returned.
    ///
    /// A slot still held by a pending or confirmed reservation stays
    /// occupied.
    #[instrument(skip(self))]
    pub async fn release(&self, slot_id: &str) {
        let mut delay = self.release_backoff;

        for attempt in 1..=self.release_attempts {
            match self.store.free(slot_id).await {
                Ok(true) => {
                    debug!("Slot released");
                    return;
                }
                Ok(false) => {
                    warn!("Slot not released: missing or held by a live reservation");
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Slot release failed");
                    if attempt < self.release_attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        error!(attempts = self.release_attempts, "Giving up on slot release");
    }
}
