//! Reservation state machine.
//!
//! ```text
//! pending ──confirm──▶ confirmed
//!    │ ──reject───▶ rejected
//!    │ ──expire───▶ expired ──penalize──▶ penalized
//!    └──penalize (past deadline)─────────▶ penalized
//! ```
//!
//! Every transition is a compare-and-set on the stored state. Side effects
//! (slot release, notifications) run only for the caller whose write applied,
//! so overlapping callers never release or notify twice. Side effects are
//! best-effort and never undo the transition.

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::ledger::{ClaimRequest, SlotLedger};
use super::{BookingError, BookingPolicy};
use crate::notifications::{
    DEFAULT_TITLE, NEW_RESERVATION_TITLE, NotificationDispatcher, PENALIZATION_TITLE, Payload,
    Target,
};
use crate::storage::{NewPenalty, Penalty, Reservation, ReservationState, Role, SpacebookDatabase};

/// Drives reservations through their lifecycle.
pub struct ReservationStateMachine {
    db: SpacebookDatabase,
    ledger: SlotLedger,
    dispatcher: NotificationDispatcher,
    policy: BookingPolicy,
}

impl ReservationStateMachine {
    pub const fn new(
        db: SpacebookDatabase,
        ledger: SlotLedger,
        dispatcher: NotificationDispatcher,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            db,
            ledger,
            dispatcher,
            policy,
        }
    }

    pub const fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Book a slot. The new reservation is `pending` until confirmed.
    #[instrument(skip(self, request), fields(slot_id = %request.slot_id, user_id = %request.user_id))]
    pub async fn create(
        &self,
        request: &ClaimRequest,
        now: i64,
    ) -> Result<Reservation, BookingError> {
        let reservation = self.ledger.claim(request, now).await?;

        let minutes = self.policy.confirmation_deadline_secs / 60;
        self.notify_admins(
            Payload::new(
                NEW_RESERVATION_TITLE,
                format!(
                    "New reservation by {} for space {} is awaiting confirmation",
                    reservation.user_id, reservation.space_id
                ),
            )
            .with_data(reservation_data(&reservation)),
        )
        .await;
        self.notify_user(
            &reservation,
            Payload::new(
                DEFAULT_TITLE,
                if minutes > 0 {
                    format!("Your reservation is pending. Confirm it within {minutes} minutes.")
                } else {
                    format!(
                        "Your reservation is pending. Confirm it within {} seconds.",
                        self.policy.confirmation_deadline_secs
                    )
                },
            ),
            now,
        )
        .await;

        Ok(reservation)
    }

    /// `pending → confirmed`. The slot stays occupied. Confirming an already
    /// confirmed reservation is a no-op.
    #[instrument(skip(self))]
    pub async fn confirm(&self, id: &str, now: i64) -> Result<Reservation, BookingError> {
        let current = self.get(id).await?;
        let applied = self
            .db
            .transition_reservation(id, &[ReservationState::Pending], ReservationState::Confirmed, now)
            .await?;

        if applied {
            info!(reservation_id = %id, "Reservation confirmed");
            return Ok(moved(current, ReservationState::Confirmed, now));
        }
        let latest = self.get(id).await?;
        match latest.state {
            ReservationState::Confirmed => Ok(latest),
            from => Err(BookingError::InvalidTransition {
                id: id.to_string(),
                from,
                to: ReservationState::Confirmed,
            }),
        }
    }

    /// `pending → rejected`, releasing the slot. Rejecting an already rejected
    /// reservation is a no-op.
    #[instrument(skip(self))]
    pub async fn reject(&self, id: &str, now: i64) -> Result<Reservation, BookingError> {
        let current = self.get(id).await?;
        let applied = self
            .db
            .transition_reservation(id, &[ReservationState::Pending], ReservationState::Rejected, now)
            .await?;

        if !applied {
            let latest = self.get(id).await?;
            return match latest.state {
                ReservationState::Rejected => Ok(latest),
                from => Err(BookingError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: ReservationState::Rejected,
                }),
            };
        }

        info!(reservation_id = %id, "Reservation rejected");
        let reservation = moved(current, ReservationState::Rejected, now);
        self.ledger.release(&reservation.slot_id).await;
        self.notify_user(
            &reservation,
            Payload::new(DEFAULT_TITLE, "Your reservation was rejected and the slot is free again.")
                .with_data(reservation_data(&reservation)),
            now,
        )
        .await;

        Ok(reservation)
    }

    /// `pending → expired` once the confirmation deadline has passed.
    ///
    /// Returns `true` if this call expired the reservation, `false` if it was
    /// already expired or left `pending` concurrently.
    ///
    /// # Errors
    ///
    /// `TooEarly` while the reservation is still within its window;
    /// `InvalidTransition` for reservations that were never going to expire.
    #[instrument(skip(self))]
    pub async fn expire(&self, id: &str, now: i64) -> Result<bool, BookingError> {
        let current = self.get(id).await?;
        match current.state {
            ReservationState::Pending => {}
            ReservationState::Expired => return Ok(false),
            from => {
                return Err(BookingError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: ReservationState::Expired,
                });
            }
        }
        if !self.policy.is_overdue(current.created_at, now) {
            return Err(BookingError::TooEarly {
                id: id.to_string(),
                eligible_at: self.policy.eligible_at(current.created_at),
            });
        }

        let applied = self
            .db
            .transition_overdue_reservation(
                id,
                ReservationState::Expired,
                self.policy.overdue_cutoff(now),
                now,
            )
            .await?;
        if !applied {
            debug!(reservation_id = %id, "Reservation left pending before it could expire");
            return Ok(false);
        }

        info!(reservation_id = %id, user_id = %current.user_id, "Reservation expired");
        let reservation = moved(current, ReservationState::Expired, now);
        self.ledger.release(&reservation.slot_id).await;
        self.notify_user(
            &reservation,
            Payload::new(
                DEFAULT_TITLE,
                "Your reservation expired because it was not confirmed in time.",
            )
            .with_data(reservation_data(&reservation)),
            now,
        )
        .await;
        self.notify_admins(
            Payload::new(
                PENALIZATION_TITLE,
                format!(
                    "Reservation by {} expired without confirmation and can be penalized",
                    reservation.user_id
                ),
            )
            .with_data(reservation_data(&reservation)),
        )
        .await;

        Ok(true)
    }

    /// `expired → penalized`, or `pending → penalized` once past the deadline.
    ///
    /// Creates a penalization lasting the configured window from `now`.
    ///
    /// # Errors
    ///
    /// - `TooEarly` for a pending reservation still within its window
    /// - `AlreadyPenalized` if the user already has an effective penalization
    /// - `InvalidTransition` for confirmed, rejected or penalized reservations
    #[instrument(skip(self, reason))]
    pub async fn penalize(
        &self,
        id: &str,
        reason: Option<&str>,
        now: i64,
    ) -> Result<Penalty, BookingError> {
        let current = self.get(id).await?;
        let mut from_pending = match current.state {
            ReservationState::Expired => false,
            ReservationState::Pending => {
                if !self.policy.is_overdue(current.created_at, now) {
                    return Err(BookingError::TooEarly {
                        id: id.to_string(),
                        eligible_at: self.policy.eligible_at(current.created_at),
                    });
                }
                true
            }
            from => {
                return Err(BookingError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: ReservationState::Penalized,
                });
            }
        };

        let penalty = self
            .insert_penalty(&current.user_id, Some(id), reason, now)
            .await?;

        let mut applied = if from_pending {
            self.db
                .transition_overdue_reservation(
                    id,
                    ReservationState::Penalized,
                    self.policy.overdue_cutoff(now),
                    now,
                )
                .await?
        } else {
            false
        };
        if !applied {
            // Either it was expired to begin with, or the monitor expired it
            // (and released the slot) since it was read.
            applied = self
                .db
                .transition_reservation(id, &[ReservationState::Expired], ReservationState::Penalized, now)
                .await?;
            from_pending = false;
        }

        if !applied {
            if let Err(e) = self.db.delete_penalty(&penalty.id).await {
                warn!(penalty_id = %penalty.id, error = %e, "Failed to undo penalization");
            }
            let latest = self.get(id).await?;
            return Err(BookingError::InvalidTransition {
                id: id.to_string(),
                from: latest.state,
                to: ReservationState::Penalized,
            });
        }

        info!(
            reservation_id = %id,
            user_id = %current.user_id,
            penalty_id = %penalty.id,
            until = penalty.ends_at,
            "Reservation penalized"
        );

        if from_pending {
            self.ledger.release(&current.slot_id).await;
        }
        self.notify_user(&current, penalty_payload(&penalty), now).await;

        Ok(penalty)
    }

    // =========================================================================
    // Penalizations
    // =========================================================================

    /// Penalize a user directly, without a triggering reservation.
    #[instrument(skip(self, reason))]
    pub async fn penalize_user(
        &self,
        user_id: &str,
        reason: Option<&str>,
        now: i64,
    ) -> Result<Penalty, BookingError> {
        let penalty = self.insert_penalty(user_id, None, reason, now).await?;
        info!(user_id = %user_id, penalty_id = %penalty.id, until = penalty.ends_at, "User penalized");

        let payload = penalty_payload(&penalty);
        self.record_inbox(user_id, None, &payload, now).await;
        self.send(&Target::User(user_id.to_string()), &payload).await;

        Ok(penalty)
    }

    /// Deactivate a penalization before its window ends. Lifting an inactive
    /// penalization is a no-op.
    #[instrument(skip(self))]
    pub async fn lift_penalty(&self, penalty_id: &str) -> Result<Penalty, BookingError> {
        if self.db.deactivate_penalty(penalty_id).await? {
            info!(penalty_id = %penalty_id, "Penalization lifted");
        }
        self.db
            .get_penalty(penalty_id)
            .await?
            .ok_or_else(|| BookingError::PenaltyNotFound(penalty_id.to_string()))
    }

    pub async fn is_user_penalized(&self, user_id: &str, now: i64) -> Result<bool, BookingError> {
        Ok(self.db.has_effective_penalty(user_id, now).await?)
    }

    pub async fn penalties(&self, user_id: Option<&str>) -> Result<Vec<Penalty>, BookingError> {
        Ok(self.db.list_penalties(user_id).await?)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: &str) -> Result<Reservation, BookingError> {
        self.db
            .get_reservation(id)
            .await?
            .ok_or_else(|| BookingError::ReservationNotFound(id.to_string()))
    }

    pub async fn list(
        &self,
        state: Option<ReservationState>,
        user_id: Option<&str>,
    ) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.db.list_reservations(state, user_id).await?)
    }

    pub async fn pending(&self) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.db.list_pending_reservations().await?)
    }

    // =========================================================================
    // Side effects
    // =========================================================================

    async fn insert_penalty(
        &self,
        user_id: &str,
        reservation_id: Option<&str>,
        reason: Option<&str>,
        now: i64,
    ) -> Result<Penalty, BookingError> {
        let new = NewPenalty {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            reservation_id: reservation_id.map(ToString::to_string),
            reason: reason.unwrap_or("Reservation not confirmed in time").to_string(),
            starts_at: now,
            ends_at: now.saturating_add(self.policy.penalty_duration_secs),
        };
        self.db
            .insert_penalty_if_none_effective(&new)
            .await?
            .ok_or_else(|| BookingError::AlreadyPenalized(user_id.to_string()))
    }

    async fn notify_user(&self, reservation: &Reservation, payload: Payload, now: i64) {
        self.record_inbox(&reservation.user_id, Some(&reservation.id), &payload, now)
            .await;
        self.send(&Target::User(reservation.user_id.clone()), &payload)
            .await;
    }

    async fn notify_admins(&self, payload: Payload) {
        self.send(&Target::Role(Role::Admin), &payload).await;
    }

    async fn record_inbox(
        &self,
        user_id: &str,
        reservation_id: Option<&str>,
        payload: &Payload,
        now: i64,
    ) {
        let id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self
            .db
            .record_notification(&id, user_id, reservation_id, &payload.title, &payload.body, now)
            .await
        {
            warn!(user_id = %user_id, error = %e, "Failed to record notification");
        }
    }

    async fn send(&self, target: &Target, payload: &Payload) {
        match self.dispatcher.dispatch(target, payload).await {
            Ok(report) if report.attempted > 0 && report.sent == 0 => {
                warn!(audience = ?target, attempted = report.attempted, "No notification delivered");
            }
            Ok(report) => {
                debug!(audience = ?target, attempted = report.attempted, sent = report.sent, "Notification dispatched");
            }
            Err(e) => warn!(audience = ?target, error = %e, "Notification dispatch failed"),
        }
    }
}

/// `current` as stored by a transition this caller applied.
fn moved(current: Reservation, state: ReservationState, now: i64) -> Reservation {
    Reservation {
        state,
        updated_at: now,
        ..current
    }
}

fn reservation_data(reservation: &Reservation) -> serde_json::Value {
    json!({
        "reservationId": reservation.id,
        "spaceId": reservation.space_id,
        "state": reservation.state,
    })
}

fn penalty_payload(penalty: &Penalty) -> Payload {
    let minutes = (penalty.ends_at - penalty.starts_at).max(0) / 60;
    Payload::new(
        PENALIZATION_TITLE,
        format!(
            "You have been penalized for {minutes} minutes and cannot book until it ends. Reason: {}",
            penalty.reason
        ),
    )
    .with_data(json!({
        "penaltyId": penalty.id,
        "reservationId": penalty.reservation_id,
        "endsAt": penalty.ends_at,
    }))
}
