//! Data models for SpaceBook storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReservationState {
    Pending,
    Confirmed,
    Rejected,
    Expired,
    Penalized,
}

impl ReservationState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Penalized => "penalized",
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "penalized" => Ok(Self::Penalized),
            other => Err(format!("unknown reservation state: {other}")),
        }
    }
}

/// Audience a push subscription belongs to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Client,
}

impl Role {
    /// Normalize a loosely-typed role indicator.
    ///
    /// `"admin"` in any letter case and boolean `true` mean admin. Anything
    /// else, including a missing value, means client.
    pub fn normalize(raw: Option<&serde_json::Value>) -> Self {
        match raw {
            Some(serde_json::Value::String(s)) if s.trim().eq_ignore_ascii_case("admin") => {
                Self::Admin
            }
            Some(serde_json::Value::Bool(true)) => Self::Admin,
            _ => Self::Client,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: String,
    pub location: String,
    pub capacity: i64,
    /// Administrator switch; a closed space accepts no bookings.
    pub available: bool,
    pub created_at: i64,
    /// Derived on read: at least one of the space's slots is free.
    pub has_free_slot: bool,
}

/// Fields supplied when registering a space.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewSpace {
    pub name: String,
    pub description: String,
    pub kind: String,
    pub location: String,
    pub capacity: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub space_id: String,
    pub weekday: String,
    pub opens_at: String,
    pub closes_at: String,
    pub occupied: bool,
    pub created_at: i64,
}

/// Space fields an administrator may change; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpaceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<i64>,
}

/// Fields supplied when adding a slot to a space.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewSlot {
    pub weekday: String,
    pub opens_at: String,
    pub closes_at: String,
}

/// Slot schedule changes; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlotUpdate {
    pub weekday: Option<String>,
    pub opens_at: Option<String>,
    pub closes_at: Option<String>,
}

/// Result of an atomic slot claim.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The slot was free; it is now occupied by this pending reservation.
    Claimed(Reservation),
    /// Another reservation holds the slot.
    SlotTaken,
    /// The slot's space has been closed by an administrator.
    SpaceClosed,
    /// The slot does not exist.
    SlotMissing,
}

/// Result of a change that is refused while a reservation holds the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Applied(T),
    NotFound,
    /// An occupied slot or a live reservation blocks the change.
    InUse,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub user_id: String,
    pub space_id: String,
    pub slot_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub state: ReservationState,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A reservation about to be written in the `pending` state.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: String,
    pub user_id: String,
    pub space_id: String,
    pub slot_id: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Penalty {
    pub id: String,
    pub user_id: String,
    pub reservation_id: Option<String>,
    pub reason: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub active: bool,
}

/// A penalization about to be written.
#[derive(Debug, Clone)]
pub struct NewPenalty {
    pub id: String,
    pub user_id: String,
    pub reservation_id: Option<String>,
    pub reason: String,
    pub starts_at: i64,
    pub ends_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub endpoint: String,
    pub role: Role,
    pub user_id: Option<String>,
    pub p256dh: String,
    pub auth: String,
    pub created_at: i64,
}

impl Subscription {
    /// Both encryption keys are present.
    pub fn has_keys(&self) -> bool {
        !self.p256dh.trim().is_empty() && !self.auth.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub reservation_id: Option<String>,
    pub title: String,
    pub message: String,
    pub sent_at: i64,
}
