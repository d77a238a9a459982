//! Persisted push subscriptions.

use async_trait::async_trait;
use spacebook_core::db::unix_timestamp;
use tracing::info;

use super::{NotificationError, PushKeys, Target};
use crate::storage::{Role, SpacebookDatabase, Subscription};

/// What the dispatcher needs from subscription storage.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Subscriptions addressed by `target`.
    async fn resolve(&self, target: &Target) -> Result<Vec<Subscription>, NotificationError>;

    /// Remove the given endpoints, ignoring ones that are already gone.
    async fn remove_many(&self, endpoints: &[String]) -> Result<u64, NotificationError>;
}

/// Registry of push subscriptions keyed by endpoint.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    db: SpacebookDatabase,
}

impl SubscriptionRegistry {
    pub const fn new(db: SpacebookDatabase) -> Self {
        Self { db }
    }

    /// Register or refresh a subscription. Re-subscribing the same endpoint
    /// replaces its role, user and keys.
    pub async fn upsert(
        &self,
        endpoint: &str,
        role: Role,
        user_id: Option<&str>,
        keys: &PushKeys,
    ) -> Result<(), NotificationError> {
        self.db
            .upsert_subscription(
                endpoint,
                role,
                user_id,
                &keys.p256dh,
                &keys.auth,
                unix_timestamp(),
            )
            .await?;

        info!(endpoint = %endpoint, role = %role, user_id = ?user_id, "Subscription registered");
        Ok(())
    }

    /// Remove one subscription. Returns how many rows were removed (0 or 1).
    pub async fn remove(&self, endpoint: &str) -> Result<u64, NotificationError> {
        let removed = self.db.delete_subscription(endpoint).await?;
        info!(endpoint = %endpoint, removed, "Subscription removed");
        Ok(removed)
    }

    /// Subscriptions by user (which takes precedence) or by role.
    pub async fn query(
        &self,
        role: Option<Role>,
        user_id: Option<&str>,
    ) -> Result<Vec<Subscription>, NotificationError> {
        Ok(self.db.query_subscriptions(role, user_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Subscription>, NotificationError> {
        Ok(self.db.list_subscriptions().await?)
    }
}

#[async_trait]
impl SubscriptionStore for SubscriptionRegistry {
    async fn resolve(&self, target: &Target) -> Result<Vec<Subscription>, NotificationError> {
        match target {
            Target::User(user_id) => self.query(None, Some(user_id)).await,
            Target::Role(role) => self.query(Some(*role), None).await,
            Target::Broadcast => self.list().await,
        }
    }

    async fn remove_many(&self, endpoints: &[String]) -> Result<u64, NotificationError> {
        if endpoints.is_empty() {
            return Ok(0);
        }
        let removed = self.db.delete_subscriptions(endpoints).await?;
        info!(requested = endpoints.len(), removed, "Subscriptions purged");
        Ok(removed)
    }
}
