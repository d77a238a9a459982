//! Storage layer tests for the SpaceBook server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::db::SpacebookDatabase;
use super::models::{
    ClaimOutcome, Guarded, NewPenalty, NewReservation, NewSlot, NewSpace, Reservation,
    ReservationState, Role, SlotUpdate, SpaceUpdate,
};

const NOW: i64 = 1_760_000_000;

async fn test_db() -> SpacebookDatabase {
    SpacebookDatabase::open_in_memory().await.unwrap()
}

async fn seed_space_with_slots(db: &SpacebookDatabase, slots: &[&str]) {
    db.create_space(
        "space-1",
        &NewSpace {
            name: "Sala A".to_string(),
            ..NewSpace::default()
        },
        NOW,
    )
    .await
    .unwrap();
    for slot in slots {
        db.create_slot(
            slot,
            "space-1",
            &NewSlot {
                weekday: "monday".to_string(),
                opens_at: "08:00".to_string(),
                closes_at: "10:00".to_string(),
            },
            NOW,
        )
        .await
        .unwrap();
    }
}

fn new_reservation(id: &str, slot_id: &str, user_id: &str) -> NewReservation {
    NewReservation {
        id: id.to_string(),
        user_id: user_id.to_string(),
        space_id: "space-1".to_string(),
        slot_id: slot_id.to_string(),
        start_time: NOW,
        end_time: NOW + 3600,
    }
}

fn new_penalty(id: &str, user_id: &str, starts_at: i64) -> NewPenalty {
    NewPenalty {
        id: id.to_string(),
        user_id: user_id.to_string(),
        reservation_id: None,
        reason: "no-show".to_string(),
        starts_at,
        ends_at: starts_at + 300,
    }
}

// === Space and slot tests ===

async fn claim(
    db: &SpacebookDatabase,
    id: &str,
    slot_id: &str,
    user_id: &str,
    now: i64,
) -> Reservation {
    match db
        .claim_slot(&new_reservation(id, slot_id, user_id), now)
        .await
        .unwrap()
    {
        ClaimOutcome::Claimed(r) => r,
        other => panic!("claim of {slot_id} failed: {other:?}"),
    }
}

#[tokio::test]
async fn create_and_list_spaces() {
    let db = test_db().await;
    seed_space_with_slots(&db, &[]).await;

    let space = db.get_space("space-1").await.unwrap().unwrap();
    assert_eq!(space.name, "Sala A");
    assert_eq!(space.capacity, 1);
    assert!(space.available);
    assert!(!space.has_free_slot);
    assert_eq!(db.list_spaces().await.unwrap().len(), 1);
    assert!(db.get_space("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn free_slot_is_idempotent() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;

    assert!(db.free_slot("slot-1").await.unwrap());
    assert!(db.free_slot("slot-1").await.unwrap());
    assert!(!db.get_slot("slot-1").await.unwrap().unwrap().occupied);
    assert!(!db.free_slot("missing").await.unwrap());
}

#[tokio::test]
async fn release_skips_slot_held_by_live_reservation() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;

    assert!(!db.release_slot("slot-1").await.unwrap());
    assert!(db.get_slot("slot-1").await.unwrap().unwrap().occupied);

    db.transition_reservation("r1", &[ReservationState::Pending], ReservationState::Confirmed, NOW)
        .await
        .unwrap();
    assert!(!db.release_slot("slot-1").await.unwrap());

    db.transition_reservation("r1", &[ReservationState::Confirmed], ReservationState::Expired, NOW)
        .await
        .unwrap();
    assert!(db.release_slot("slot-1").await.unwrap());
    assert!(db.release_slot("slot-1").await.unwrap());
    assert!(!db.get_slot("slot-1").await.unwrap().unwrap().occupied);
    assert!(!db.release_slot("missing").await.unwrap());
}

#[tokio::test]
async fn list_free_slots_only() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1", "slot-2"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;

    assert_eq!(db.list_slots("space-1", false).await.unwrap().len(), 2);
    let free = db.list_slots("space-1", true).await.unwrap();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].id, "slot-2");
}

#[tokio::test]
async fn free_slot_flag_is_derived_from_slots() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1", "slot-2"]).await;

    claim(&db, "r1", "slot-1", "alice", NOW).await;
    assert!(db.get_space("space-1").await.unwrap().unwrap().has_free_slot);

    claim(&db, "r2", "slot-2", "bob", NOW).await;
    let full = db.get_space("space-1").await.unwrap().unwrap();
    assert!(!full.has_free_slot);
    assert!(full.available);

    db.free_slot("slot-2").await.unwrap();
    assert!(db.list_spaces().await.unwrap()[0].has_free_slot);
}

#[tokio::test]
async fn availability_override() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;

    assert!(db.set_space_availability("space-1", false).await.unwrap());
    let closed = db.get_space("space-1").await.unwrap().unwrap();
    assert!(!closed.available);
    assert!(closed.has_free_slot);
    assert!(!db.set_space_availability("missing", true).await.unwrap());
}

#[tokio::test]
async fn update_space_changes_only_given_fields() {
    let db = test_db().await;
    seed_space_with_slots(&db, &[]).await;

    let updated = db
        .update_space(
            "space-1",
            &SpaceUpdate {
                location: Some("Planta 2".to_string()),
                capacity: Some(12),
                ..SpaceUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "Sala A");
    assert_eq!(updated.location, "Planta 2");
    assert_eq!(updated.capacity, 12);
    assert!(
        db.update_space("missing", &SpaceUpdate::default())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn occupied_slot_cannot_be_retimed_or_deleted() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1", "slot-2"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;
    let retime = SlotUpdate {
        opens_at: Some("12:00".to_string()),
        ..SlotUpdate::default()
    };

    assert!(matches!(db.update_slot("slot-1", &retime).await.unwrap(), Guarded::InUse));
    assert_eq!(db.delete_slot("slot-1").await.unwrap(), Guarded::InUse);
    assert_eq!(db.get_slot("slot-1").await.unwrap().unwrap().opens_at, "08:00");

    let Guarded::Applied(slot) = db.update_slot("slot-2", &retime).await.unwrap() else {
        panic!("free slot should be retimed");
    };
    assert_eq!(slot.opens_at, "12:00");
    assert_eq!(slot.closes_at, "10:00");
    assert_eq!(db.delete_slot("slot-2").await.unwrap(), Guarded::Applied(()));
    assert_eq!(db.delete_slot("slot-2").await.unwrap(), Guarded::NotFound);
    assert!(matches!(db.update_slot("slot-2", &retime).await.unwrap(), Guarded::NotFound));
}

#[tokio::test]
async fn delete_slot_drops_finished_history() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;
    db.transition_reservation("r1", &[ReservationState::Pending], ReservationState::Rejected, NOW)
        .await
        .unwrap();
    db.release_slot("slot-1").await.unwrap();

    assert_eq!(db.delete_slot("slot-1").await.unwrap(), Guarded::Applied(()));
    assert!(db.get_reservation("r1").await.unwrap().is_none());
}

#[tokio::test]
async fn space_with_live_booking_cannot_be_deleted() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;

    assert_eq!(db.delete_space("space-1").await.unwrap(), Guarded::InUse);
    assert!(db.get_space("space-1").await.unwrap().is_some());

    db.transition_reservation("r1", &[ReservationState::Pending], ReservationState::Rejected, NOW)
        .await
        .unwrap();
    db.release_slot("slot-1").await.unwrap();
    assert_eq!(db.delete_space("space-1").await.unwrap(), Guarded::Applied(()));
    assert!(db.get_slot("slot-1").await.unwrap().is_none());
    assert!(db.get_reservation("r1").await.unwrap().is_none());
    assert_eq!(db.delete_space("space-1").await.unwrap(), Guarded::NotFound);
}

// === Reservation tests ===

#[tokio::test]
async fn claim_takes_slot_and_starts_pending() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;

    let r = claim(&db, "r1", "slot-1", "alice", NOW).await;
    assert_eq!(r.state, ReservationState::Pending);
    assert_eq!(r.created_at, NOW);
    assert!(db.get_slot("slot-1").await.unwrap().unwrap().occupied);
    let stored = db.list_pending_reservations().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].slot_id, "slot-1");

    let again = db
        .claim_slot(&new_reservation("r2", "slot-1", "bob"), NOW)
        .await
        .unwrap();
    assert!(matches!(again, ClaimOutcome::SlotTaken));
    assert!(db.get_reservation("r2").await.unwrap().is_none());
}

#[tokio::test]
async fn claim_refuses_closed_space_and_missing_slot() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;
    db.set_space_availability("space-1", false).await.unwrap();

    let closed = db
        .claim_slot(&new_reservation("r1", "slot-1", "alice"), NOW)
        .await
        .unwrap();
    assert!(matches!(closed, ClaimOutcome::SpaceClosed));
    assert!(!db.get_slot("slot-1").await.unwrap().unwrap().occupied);

    let missing = db
        .claim_slot(&new_reservation("r1", "nope", "alice"), NOW)
        .await
        .unwrap();
    assert!(matches!(missing, ClaimOutcome::SlotMissing));
    assert!(db.list_reservations(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_insert_rolls_back_slot() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1", "slot-2"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;

    // Reusing the id makes the insert fail after the slot was taken.
    let result = db
        .claim_slot(&new_reservation("r1", "slot-2", "bob"), NOW)
        .await;

    assert!(result.is_err());
    assert!(!db.get_slot("slot-2").await.unwrap().unwrap().occupied);
    assert_eq!(db.list_reservations(None, None).await.unwrap().len(), 1);
    claim(&db, "r2", "slot-2", "bob", NOW).await;
}

#[tokio::test]
async fn transition_applies_once() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;

    let from = [ReservationState::Pending];
    assert!(
        db.transition_reservation("r1", &from, ReservationState::Confirmed, NOW + 1)
            .await
            .unwrap()
    );
    assert!(
        !db.transition_reservation("r1", &from, ReservationState::Rejected, NOW + 2)
            .await
            .unwrap()
    );

    let r = db.get_reservation("r1").await.unwrap().unwrap();
    assert_eq!(r.state, ReservationState::Confirmed);
    assert_eq!(r.updated_at, NOW + 1);
}

#[tokio::test]
async fn overdue_transition_respects_cutoff() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;

    assert!(
        !db.transition_overdue_reservation("r1", ReservationState::Expired, NOW - 1, NOW)
            .await
            .unwrap()
    );
    assert!(
        db.transition_overdue_reservation("r1", ReservationState::Expired, NOW, NOW)
            .await
            .unwrap()
    );
    assert!(
        !db.transition_overdue_reservation("r1", ReservationState::Expired, NOW, NOW)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn list_reservations_filters() {
    let db = test_db().await;
    seed_space_with_slots(&db, &["slot-1", "slot-2"]).await;
    claim(&db, "r1", "slot-1", "alice", NOW).await;
    claim(&db, "r2", "slot-2", "bob", NOW + 1).await;
    db.transition_reservation(
        "r2",
        &[ReservationState::Pending],
        ReservationState::Confirmed,
        NOW + 2,
    )
    .await
    .unwrap();

    assert_eq!(db.list_reservations(None, None).await.unwrap().len(), 2);
    let pending = db
        .list_reservations(Some(ReservationState::Pending), None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "r1");
    let bob = db.list_reservations(None, Some("bob")).await.unwrap();
    assert_eq!(bob.len(), 1);
    assert!(
        db.list_reservations(Some(ReservationState::Pending), Some("bob"))
            .await
            .unwrap()
            .is_empty()
    );
}

// === Penalty tests ===

#[tokio::test]
async fn only_one_effective_penalty_per_user() {
    let db = test_db().await;

    let first = db
        .insert_penalty_if_none_effective(&new_penalty("p1", "alice", NOW))
        .await
        .unwrap();
    assert!(first.is_some());

    let second = db
        .insert_penalty_if_none_effective(&new_penalty("p2", "alice", NOW + 10))
        .await
        .unwrap();
    assert!(second.is_none());

    // Other users are unaffected.
    assert!(
        db.insert_penalty_if_none_effective(&new_penalty("p3", "bob", NOW))
            .await
            .unwrap()
            .is_some()
    );

    // Once the first window has elapsed a new one may be created.
    assert!(
        db.insert_penalty_if_none_effective(&new_penalty("p4", "alice", NOW + 300))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn effective_penalty_window() {
    let db = test_db().await;
    db.insert_penalty_if_none_effective(&new_penalty("p1", "alice", NOW))
        .await
        .unwrap();

    assert!(db.has_effective_penalty("alice", NOW).await.unwrap());
    assert!(db.has_effective_penalty("alice", NOW + 299).await.unwrap());
    assert!(!db.has_effective_penalty("alice", NOW + 300).await.unwrap());
    assert!(!db.has_effective_penalty("bob", NOW).await.unwrap());
}

#[tokio::test]
async fn deactivate_penalties() {
    let db = test_db().await;
    db.insert_penalty_if_none_effective(&new_penalty("p1", "alice", NOW))
        .await
        .unwrap();
    db.insert_penalty_if_none_effective(&new_penalty("p2", "bob", NOW + 100))
        .await
        .unwrap();

    assert_eq!(db.deactivate_elapsed_penalties(NOW + 300).await.unwrap(), 1);
    assert!(!db.get_penalty("p1").await.unwrap().unwrap().active);
    assert!(db.get_penalty("p2").await.unwrap().unwrap().active);

    assert!(db.deactivate_penalty("p2").await.unwrap());
    assert!(!db.deactivate_penalty("p2").await.unwrap());
    assert!(!db.has_effective_penalty("bob", NOW + 150).await.unwrap());
    assert_eq!(db.list_penalties(Some("bob")).await.unwrap().len(), 1);
    assert_eq!(db.list_penalties(None).await.unwrap().len(), 2);
}

// === Subscription tests ===

#[tokio::test]
async fn upsert_replaces_subscription() {
    let db = test_db().await;
    db.upsert_subscription("https://push/1", Role::Client, Some("alice"), "k", "a", NOW)
        .await
        .unwrap();
    db.upsert_subscription("https://push/1", Role::Admin, None, "k2", "a2", NOW + 1)
        .await
        .unwrap();

    let subs = db.list_subscriptions().await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].role, Role::Admin);
    assert!(subs[0].user_id.is_none());
    assert_eq!(subs[0].p256dh, "k2");
    assert_eq!(subs[0].created_at, NOW + 1);
}

#[tokio::test]
async fn query_subscriptions_prefers_user() {
    let db = test_db().await;
    db.upsert_subscription("https://push/a", Role::Admin, Some("root"), "k", "a", NOW)
        .await
        .unwrap();
    db.upsert_subscription("https://push/b", Role::Client, Some("alice"), "k", "a", NOW)
        .await
        .unwrap();
    db.upsert_subscription("https://push/c", Role::Client, None, "k", "a", NOW)
        .await
        .unwrap();

    let admins = db.query_subscriptions(Some(Role::Admin), None).await.unwrap();
    assert_eq!(admins.len(), 1);
    let alice = db
        .query_subscriptions(Some(Role::Admin), Some("alice"))
        .await
        .unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].endpoint, "https://push/b");
    assert_eq!(db.query_subscriptions(None, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn delete_subscriptions_tolerates_missing() {
    let db = test_db().await;
    db.upsert_subscription("https://push/1", Role::Client, None, "k", "a", NOW)
        .await
        .unwrap();
    db.upsert_subscription("https://push/2", Role::Client, None, "k", "a", NOW)
        .await
        .unwrap();

    let removed = db
        .delete_subscriptions(&[
            "https://push/1".to_string(),
            "https://push/gone".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(db.delete_subscription("https://push/2").await.unwrap(), 1);
    assert_eq!(db.delete_subscription("https://push/2").await.unwrap(), 0);
    assert_eq!(db.delete_subscriptions(&[]).await.unwrap(), 0);
}

// === Notification inbox tests ===

#[tokio::test]
async fn notification_inbox_newest_first() {
    let db = test_db().await;
    db.record_notification("n1", "alice", None, "SpaceBook", "first", NOW)
        .await
        .unwrap();
    db.record_notification("n2", "alice", None, "SpaceBook", "second", NOW + 5)
        .await
        .unwrap();
    db.record_notification("n3", "bob", None, "SpaceBook", "other", NOW)
        .await
        .unwrap();

    let inbox = db.list_notifications_for_user("alice").await.unwrap();
    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[0].message, "second");
}

#[tokio::test]
async fn file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("spacebook.db");

    let db = SpacebookDatabase::open(&path, 2).await.unwrap();
    db.upsert_subscription("https://push/1", Role::Admin, Some("root"), "k", "a", NOW)
        .await
        .unwrap();
    db.pool().close().await;

    let reopened = SpacebookDatabase::open(&path, 2).await.unwrap();
    let subs = reopened.list_subscriptions().await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].role, Role::Admin);
    assert_eq!(subs[0].user_id.as_deref(), Some("root"));
}
