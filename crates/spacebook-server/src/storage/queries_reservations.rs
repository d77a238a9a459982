//! Reservation queries.
//!
//! State changes are compare-and-set writes: the `UPDATE` only applies while
//! the row is still in one of the expected source states, so two callers
//! racing on the same reservation cannot both win.

use super::db::{DatabaseError, SpacebookDatabase};
use super::models::{ClaimOutcome, NewReservation, Reservation, ReservationState};

/// `?, ?, ?` with `n` placeholders.
pub(super) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl SpacebookDatabase {
    /// Take a free slot and record its `pending` reservation in one
    /// transaction: either both writes land or neither does.
    ///
    /// The conditional `UPDATE` on the slot's occupied flag is the only
    /// mutual-exclusion point for bookings. It also refuses slots of a space
    /// an administrator has closed.
    pub async fn claim_slot(
        &self,
        reservation: &NewReservation,
        now: i64,
    ) -> Result<ClaimOutcome, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let taken = sqlx::query(
            "UPDATE slots SET occupied = 1 \
             WHERE id = ? AND occupied = 0 \
               AND EXISTS (SELECT 1 FROM spaces WHERE spaces.id = slots.space_id AND spaces.available = 1)",
        )
        .bind(&reservation.slot_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !taken {
            let row: Option<(bool, bool)> = sqlx::query_as(
                "SELECT slots.occupied, spaces.available FROM slots \
                 JOIN spaces ON spaces.id = slots.space_id WHERE slots.id = ?",
            )
            .bind(&reservation.slot_id)
            .fetch_optional(&mut *tx)
            .await?;
            return Ok(match row {
                None => ClaimOutcome::SlotMissing,
                Some((true, _)) => ClaimOutcome::SlotTaken,
                Some((false, _)) => ClaimOutcome::SpaceClosed,
            });
        }

        sqlx::query(
            "INSERT INTO reservations \
             (id, user_id, space_id, slot_id, start_time, end_time, state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&reservation.id)
        .bind(&reservation.user_id)
        .bind(&reservation.space_id)
        .bind(&reservation.slot_id)
        .bind(reservation.start_time)
        .bind(reservation.end_time)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ClaimOutcome::Claimed(Reservation {
            id: reservation.id.clone(),
            user_id: reservation.user_id.clone(),
            space_id: reservation.space_id.clone(),
            slot_id: reservation.slot_id.clone(),
            start_time: reservation.start_time,
            end_time: reservation.end_time,
            state: ReservationState::Pending,
            created_at: now,
            updated_at: now,
        }))
    }

    pub async fn get_reservation(&self, id: &str) -> Result<Option<Reservation>, DatabaseError> {
        let reservation =
            sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;

        Ok(reservation)
    }

    /// List reservations, newest first, optionally filtered by state and user.
    pub async fn list_reservations(
        &self,
        state: Option<ReservationState>,
        user_id: Option<&str>,
    ) -> Result<Vec<Reservation>, DatabaseError> {
        let reservations = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations \
             WHERE (?1 IS NULL OR state = ?1) AND (?2 IS NULL OR user_id = ?2) \
             ORDER BY created_at DESC, id",
        )
        .bind(state)
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(reservations)
    }

    /// All pending reservations, oldest first.
    pub async fn list_pending_reservations(&self) -> Result<Vec<Reservation>, DatabaseError> {
        let reservations = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE state = 'pending' ORDER BY created_at, id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(reservations)
    }

    /// Move a reservation to `to` if it is currently in one of `from`.
    ///
    /// Returns `true` if this call applied the transition.
    pub async fn transition_reservation(
        &self,
        id: &str,
        from: &[ReservationState],
        to: ReservationState,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        if from.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            "UPDATE reservations SET state = ?, updated_at = ? WHERE id = ? AND state IN ({})",
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql).bind(to).bind(now).bind(id);
        for state in from {
            query = query.bind(*state);
        }
        let result = query.execute(self.pool()).await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a pending reservation to `to` only if it was created at or
    /// before `created_cutoff`.
    ///
    /// Returns `true` if this call applied the transition.
    pub async fn transition_overdue_reservation(
        &self,
        id: &str,
        to: ReservationState,
        created_cutoff: i64,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE reservations SET state = ?, updated_at = ? \
             WHERE id = ? AND state = 'pending' AND created_at <= ?",
        )
        .bind(to)
        .bind(now)
        .bind(id)
        .bind(created_cutoff)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
