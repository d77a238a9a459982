//! Penalization queries.
//!
//! A penalization is *effective* at `now` when `active = 1 AND ends_at > now`.

use super::db::{DatabaseError, SpacebookDatabase};
use super::models::{NewPenalty, Penalty};

impl SpacebookDatabase {
    /// Insert a penalization unless the user already has an effective one at
    /// `penalty.starts_at`.
    ///
    /// The existence check and the insert are one statement, so concurrent
    /// callers cannot both create an effective penalization for the same
    /// user. Returns `None` when one already existed.
    pub async fn insert_penalty_if_none_effective(
        &self,
        penalty: &NewPenalty,
    ) -> Result<Option<Penalty>, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO penalties (id, user_id, reservation_id, reason, starts_at, ends_at, active) \
             SELECT ?, ?, ?, ?, ?, ?, 1 \
             WHERE NOT EXISTS ( \
               SELECT 1 FROM penalties WHERE user_id = ? AND active = 1 AND ends_at > ? \
             )",
        )
        .bind(&penalty.id)
        .bind(&penalty.user_id)
        .bind(penalty.reservation_id.as_deref())
        .bind(&penalty.reason)
        .bind(penalty.starts_at)
        .bind(penalty.ends_at)
        .bind(&penalty.user_id)
        .bind(penalty.starts_at)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_penalty(&penalty.id).await
    }

    pub async fn get_penalty(&self, id: &str) -> Result<Option<Penalty>, DatabaseError> {
        let penalty = sqlx::query_as::<_, Penalty>("SELECT * FROM penalties WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(penalty)
    }

    /// Remove a penalization row outright. Used to undo an insert whose
    /// reservation transition lost a race.
    pub async fn delete_penalty(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM penalties WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The user's effective penalization at `now`, if any.
    pub async fn effective_penalty(
        &self,
        user_id: &str,
        now: i64,
    ) -> Result<Option<Penalty>, DatabaseError> {
        let penalty = sqlx::query_as::<_, Penalty>(
            "SELECT * FROM penalties WHERE user_id = ? AND active = 1 AND ends_at > ? \
             ORDER BY ends_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        Ok(penalty)
    }

    pub async fn has_effective_penalty(&self, user_id: &str, now: i64) -> Result<bool, DatabaseError> {
        Ok(self.effective_penalty(user_id, now).await?.is_some())
    }

    /// List penalizations, newest first, optionally for a single user.
    pub async fn list_penalties(&self, user_id: Option<&str>) -> Result<Vec<Penalty>, DatabaseError> {
        let penalties = sqlx::query_as::<_, Penalty>(
            "SELECT * FROM penalties WHERE (?1 IS NULL OR user_id = ?1) \
             ORDER BY starts_at DESC, id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(penalties)
    }

    /// Deactivate a penalization. Returns `false` if it was already inactive
    /// or does not exist.
    pub async fn deactivate_penalty(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE penalties SET active = 0 WHERE id = ? AND active = 1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every active penalization whose window has elapsed.
    ///
    /// Returns the number of penalizations lifted.
    pub async fn deactivate_elapsed_penalties(&self, now: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE penalties SET active = 0 WHERE active = 1 AND ends_at <= ?")
            .bind(now)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
