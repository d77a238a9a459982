//! Push subscription queries.

use super::db::{DatabaseError, SpacebookDatabase};
use super::models::{Role, Subscription};
use super::queries_reservations::placeholders;

/// SQLite's default limit on host parameters is 999; stay well below it.
const DELETE_CHUNK: usize = 500;

impl SpacebookDatabase {
    /// Register or update a subscription.
    ///
    /// If a record with the same `endpoint` already exists, its role, user,
    /// keys and `created_at` are replaced (upsert).
    pub async fn upsert_subscription(
        &self,
        endpoint: &str,
        role: Role,
        user_id: Option<&str>,
        p256dh: &str,
        auth: &str,
        now: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO subscriptions (endpoint, role, user_id, p256dh, auth, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(endpoint) DO UPDATE SET \
               role = excluded.role, user_id = excluded.user_id, \
               p256dh = excluded.p256dh, auth = excluded.auth, created_at = excluded.created_at",
        )
        .bind(endpoint)
        .bind(role)
        .bind(user_id)
        .bind(p256dh)
        .bind(auth)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Delete a subscription. Returns the number of rows removed (0 or 1).
    pub async fn delete_subscription(&self, endpoint: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE endpoint = ?")
            .bind(endpoint)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete many subscriptions at once. Endpoints that are already gone are
    /// skipped. Returns the number of rows removed.
    pub async fn delete_subscriptions(&self, endpoints: &[String]) -> Result<u64, DatabaseError> {
        let mut removed = 0;
        let mut tx = self.pool().begin().await?;

        for chunk in endpoints.chunks(DELETE_CHUNK) {
            let sql = format!(
                "DELETE FROM subscriptions WHERE endpoint IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for endpoint in chunk {
                query = query.bind(endpoint);
            }
            removed += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Subscriptions matching a filter. A user id takes precedence over the
    /// role; with neither, every subscription matches.
    pub async fn query_subscriptions(
        &self,
        role: Option<Role>,
        user_id: Option<&str>,
    ) -> Result<Vec<Subscription>, DatabaseError> {
        let query = match (user_id, role) {
            (Some(user_id), _) => sqlx::query_as::<_, Subscription>(
                "SELECT * FROM subscriptions WHERE user_id = ? ORDER BY created_at, endpoint",
            )
            .bind(user_id.to_string()),
            (None, Some(role)) => sqlx::query_as::<_, Subscription>(
                "SELECT * FROM subscriptions WHERE role = ? ORDER BY created_at, endpoint",
            )
            .bind(role.as_str().to_string()),
            (None, None) => sqlx::query_as::<_, Subscription>(
                "SELECT * FROM subscriptions ORDER BY created_at, endpoint",
            ),
        };

        Ok(query.fetch_all(self.pool()).await?)
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>, DatabaseError> {
        self.query_subscriptions(None, None).await
    }
}
