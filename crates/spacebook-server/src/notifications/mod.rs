//! Web push notifications.
//!
//! - [`SubscriptionRegistry`] persists push endpoints with their role and user
//! - [`NotificationDispatcher`] fans a payload out to a target audience
//! - [`PushTransport`] is the deliver-or-fail seam, implemented for real
//!   push services by [`WebPushClient`]
//! - [`encryption`] and [`vapid`] produce the encrypted body and the
//!   `Authorization` header of each push request

pub mod dispatcher;
pub mod encryption;
pub mod registry;
pub mod transport;
pub mod vapid;

use serde::{Deserialize, Serialize};

pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use registry::{SubscriptionRegistry, SubscriptionStore};
pub use transport::{DeliveryError, PushTransport, WebPushClient};

use crate::storage::{Role, Subscription};

/// Title used when a message does not carry its own.
pub const DEFAULT_TITLE: &str = "SpaceBook";
/// Title of announcements about new reservations.
pub const NEW_RESERVATION_TITLE: &str = "Nueva Reserva";
/// Title of announcements about penalizations.
pub const PENALIZATION_TITLE: &str = "SpaceBook - Penalización";

/// Errors that can occur in the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The push transport could not be configured.
    #[error("Push transport error: {0}")]
    Transport(String),

    /// The payload could not be encoded.
    #[error("Payload error: {0}")]
    Payload(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<spacebook_core::db::DatabaseError> for NotificationError {
    fn from(e: spacebook_core::db::DatabaseError) -> Self {
        Self::Database(e.to_string())
    }
}

/// Client-side encryption keys of a push subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    #[serde(default)]
    pub p256dh: String,
    #[serde(default)]
    pub auth: String,
}

impl From<&Subscription> for PushKeys {
    fn from(sub: &Subscription) -> Self {
        Self {
            p256dh: sub.p256dh.clone(),
            auth: sub.auth.clone(),
        }
    }
}

/// Audience of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every subscription of one user, regardless of role.
    User(String),
    /// Every subscription with the given role.
    Role(Role),
    /// Every subscription.
    Broadcast,
}

impl Target {
    /// Build a target from optional request fields. A user id takes
    /// precedence over a role.
    pub fn from_parts(role: Option<Role>, user_id: Option<String>) -> Self {
        match (user_id, role) {
            (Some(user_id), _) => Self::User(user_id),
            (None, Some(role)) => Self::Role(role),
            (None, None) => Self::Broadcast,
        }
    }
}

/// Notification content delivered to the service worker as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    /// Serialized as `message`, the field the service worker displays.
    #[serde(rename = "message")]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Payload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
