//! Notification inbox queries.

use super::db::{DatabaseError, SpacebookDatabase};
use super::models::Notification;

impl SpacebookDatabase {
    /// Record a user-facing notification in the user's inbox.
    pub async fn record_notification(
        &self,
        id: &str,
        user_id: &str,
        reservation_id: Option<&str>,
        title: &str,
        message: &str,
        now: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, reservation_id, title, message, sent_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(reservation_id)
        .bind(title)
        .bind(message)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// A user's inbox, newest first.
    pub async fn list_notifications_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Notification>, DatabaseError> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY sent_at DESC, id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(notifications)
    }
}
