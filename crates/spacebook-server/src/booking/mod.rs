//! Slot booking and the reservation lifecycle.
//!
//! - [`SlotLedger`] claims and releases slots
//! - [`ReservationStateMachine`] drives reservations through their states
//! - [`PenalizationMonitor`] expires reservations left unconfirmed

pub mod ledger;
pub mod machine;
pub mod monitor;

use spacebook_core::config::BookingConfig;
use spacebook_core::db::DatabaseError;

pub use ledger::{ClaimRequest, SlotLedger, SlotStore};
pub use machine::ReservationStateMachine;
pub use monitor::{MonitorHandle, PenalizationMonitor, SweepReport};

use crate::storage::ReservationState;

/// Errors surfaced by booking operations.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Slot not found: {0}")]
    SlotNotFound(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Penalization not found: {0}")]
    PenaltyNotFound(String),

    #[error("Space not found: {0}")]
    SpaceNotFound(String),

    #[error("Slot {0} is already occupied")]
    SlotAlreadyOccupied(String),

    #[error("Space {0} is closed for bookings")]
    SpaceUnavailable(String),

    #[error("Slot {0} is occupied or held by a live reservation")]
    SlotInUse(String),

    #[error("Space {0} has occupied slots or live reservations")]
    SpaceInUse(String),

    #[error("User {user_id} is penalized until {until}")]
    UserPenalized { user_id: String, until: i64 },

    #[error("User {0} already has an active penalization")]
    AlreadyPenalized(String),

    #[error("Reservation {id} is within its confirmation window until {eligible_at}")]
    TooEarly { id: String, eligible_at: i64 },

    #[error("Reservation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ReservationState,
        to: ReservationState,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<DatabaseError> for BookingError {
    fn from(e: DatabaseError) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Time rules for the reservation lifecycle, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    pub confirmation_deadline_secs: i64,
    pub penalty_duration_secs: i64,
}

impl BookingPolicy {
    pub fn from_config(config: &BookingConfig) -> Self {
        Self {
            confirmation_deadline_secs: i64::try_from(config.confirmation_deadline_secs)
                .unwrap_or(i64::MAX),
            penalty_duration_secs: i64::try_from(config.penalty_duration_secs)
                .unwrap_or(i64::MAX),
        }
    }

    /// First instant at which a reservation created at `created_at` may expire.
    pub const fn eligible_at(&self, created_at: i64) -> i64 {
        created_at.saturating_add(self.confirmation_deadline_secs)
    }

    /// Reservations created at or before this instant are overdue at `now`.
    pub const fn overdue_cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.confirmation_deadline_secs)
    }

    pub const fn is_overdue(&self, created_at: i64, now: i64) -> bool {
        now >= self.eligible_at(created_at)
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::from_config(&BookingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_inclusive_and_monotonic() {
        let policy = BookingPolicy {
            confirmation_deadline_secs: 10,
            penalty_duration_secs: 300,
        };

        assert!(!policy.is_overdue(100, 109));
        assert!(policy.is_overdue(100, 110));
        for now in 110..200 {
            assert!(policy.is_overdue(100, now));
        }
        assert_eq!(policy.overdue_cutoff(110), 100);
    }

    #[test]
    fn policy_defaults_follow_config() {
        let policy = BookingPolicy::default();
        assert_eq!(policy.confirmation_deadline_secs, 600);
        assert_eq!(policy.penalty_duration_secs, 300);
    }
}
