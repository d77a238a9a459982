//! Space and slot queries.

use super::db::{DatabaseError, SpacebookDatabase};
use super::models::{Guarded, NewSlot, NewSpace, Slot, SlotUpdate, Space, SpaceUpdate};

/// Space columns plus the derived `has_free_slot`.
const SPACE_SELECT: &str = "SELECT spaces.*, \
     EXISTS (SELECT 1 FROM slots WHERE slots.space_id = spaces.id AND slots.occupied = 0) \
       AS has_free_slot \
     FROM spaces";

/// A pending or confirmed reservation holds this slot.
const SLOT_HELD: &str = "EXISTS (SELECT 1 FROM reservations \
     WHERE reservations.slot_id = slots.id AND reservations.state IN ('pending', 'confirmed'))";

impl SpacebookDatabase {
    // =========================================================================
    // Space queries
    // =========================================================================

    pub async fn create_space(
        &self,
        id: &str,
        space: &NewSpace,
        now: i64,
    ) -> Result<Space, DatabaseError> {
        sqlx::query(
            "INSERT INTO spaces (id, name, description, kind, location, capacity, available, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(id)
        .bind(&space.name)
        .bind(&space.description)
        .bind(&space.kind)
        .bind(&space.location)
        .bind(space.capacity.unwrap_or(1))
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_space(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Space {id}")))
    }

    pub async fn get_space(&self, id: &str) -> Result<Option<Space>, DatabaseError> {
        let space = sqlx::query_as::<_, Space>(&format!("{SPACE_SELECT} WHERE spaces.id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(space)
    }

    pub async fn list_spaces(&self) -> Result<Vec<Space>, DatabaseError> {
        let spaces = sqlx::query_as::<_, Space>(&format!(
            "{SPACE_SELECT} ORDER BY spaces.created_at, spaces.name"
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(spaces)
    }

    /// Change a space's descriptive fields.
    ///
    /// Returns `None` if the space does not exist.
    pub async fn update_space(
        &self,
        id: &str,
        update: &SpaceUpdate,
    ) -> Result<Option<Space>, DatabaseError> {
        let result = sqlx::query(
            "UPDATE spaces SET \
               name = COALESCE(?, name), \
               description = COALESCE(?, description), \
               kind = COALESCE(?, kind), \
               location = COALESCE(?, location), \
               capacity = COALESCE(?, capacity) \
             WHERE id = ?",
        )
        .bind(&update.name)
        .bind(&update.description)
        .bind(&update.kind)
        .bind(&update.location)
        .bind(update.capacity)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_space(id).await
    }

    /// Delete a space with its slots and their reservation history.
    ///
    /// Refused while any slot is occupied or any reservation of the space is
    /// still pending or confirmed.
    pub async fn delete_space(&self, id: &str) -> Result<Guarded<()>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "DELETE FROM spaces WHERE id = ?1 \
               AND NOT EXISTS (SELECT 1 FROM slots WHERE space_id = ?1 AND occupied = 1) \
               AND NOT EXISTS (SELECT 1 FROM reservations \
                               WHERE space_id = ?1 AND state IN ('pending', 'confirmed'))",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM spaces WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            return Ok(if exists.is_some() {
                Guarded::InUse
            } else {
                Guarded::NotFound
            });
        }

        tx.commit().await?;
        Ok(Guarded::Applied(()))
    }

    /// Administrator switch of a space's availability. Claims on a closed
    /// space are refused.
    ///
    /// Returns `false` if the space does not exist.
    pub async fn set_space_availability(
        &self,
        id: &str,
        available: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE spaces SET available = ? WHERE id = ?")
            .bind(available)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Slot queries
    // =========================================================================

    pub async fn create_slot(
        &self,
        id: &str,
        space_id: &str,
        slot: &NewSlot,
        now: i64,
    ) -> Result<Slot, DatabaseError> {
        sqlx::query(
            "INSERT INTO slots (id, space_id, weekday, opens_at, closes_at, occupied, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(id)
        .bind(space_id)
        .bind(&slot.weekday)
        .bind(&slot.opens_at)
        .bind(&slot.closes_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_slot(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Slot {id}")))
    }

    pub async fn get_slot(&self, id: &str) -> Result<Option<Slot>, DatabaseError> {
        let slot = sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(slot)
    }

    /// List the slots of a space, optionally only the free ones.
    pub async fn list_slots(
        &self,
        space_id: &str,
        free_only: bool,
    ) -> Result<Vec<Slot>, DatabaseError> {
        let sql = if free_only {
            "SELECT * FROM slots WHERE space_id = ? AND occupied = 0 ORDER BY weekday, opens_at"
        } else {
            "SELECT * FROM slots WHERE space_id = ? ORDER BY weekday, opens_at"
        };

        let slots = sqlx::query_as::<_, Slot>(sql)
            .bind(space_id)
            .fetch_all(self.pool())
            .await?;

        Ok(slots)
    }

    /// Change a free slot's schedule. Refused while the slot is occupied.
    pub async fn update_slot(
        &self,
        id: &str,
        update: &SlotUpdate,
    ) -> Result<Guarded<Slot>, DatabaseError> {
        let result = sqlx::query(&format!(
            "UPDATE slots SET \
               weekday = COALESCE(?, weekday), \
               opens_at = COALESCE(?, opens_at), \
               closes_at = COALESCE(?, closes_at) \
             WHERE id = ? AND occupied = 0 AND NOT {SLOT_HELD}"
        ))
        .bind(&update.weekday)
        .bind(&update.opens_at)
        .bind(&update.closes_at)
        .bind(id)
        .execute(self.pool())
        .await?;

        match self.get_slot(id).await? {
            None => Ok(Guarded::NotFound),
            Some(slot) if result.rows_affected() > 0 => Ok(Guarded::Applied(slot)),
            Some(_) => Ok(Guarded::InUse),
        }
    }

    /// Delete a free slot with its reservation history. Refused while the
    /// slot is occupied or a live reservation holds it.
    pub async fn delete_slot(&self, id: &str) -> Result<Guarded<()>, DatabaseError> {
        let result = sqlx::query(&format!(
            "DELETE FROM slots WHERE id = ? AND occupied = 0 AND NOT {SLOT_HELD}"
        ))
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(Guarded::Applied(()));
        }
        Ok(if self.get_slot(id).await?.is_some() {
            Guarded::InUse
        } else {
            Guarded::NotFound
        })
    }

    /// Free a slot unless a pending or confirmed reservation still holds it.
    /// Idempotent.
    ///
    /// Returns `false` if the slot does not exist or is still held.
    pub async fn release_slot(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!(
            "UPDATE slots SET occupied = 0 WHERE id = ? AND NOT {SLOT_HELD}"
        ))
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a slot free regardless of its reservations. Administrative
    /// override only.
    ///
    /// Returns `false` if the slot does not exist.
    pub async fn free_slot(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE slots SET occupied = 0 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
