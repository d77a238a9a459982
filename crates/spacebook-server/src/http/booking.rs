//! Space catalogue, reservation and penalization routes.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use spacebook_core::db::unix_timestamp;
use tracing::instrument;

use super::{ApiError, AppState};
use crate::booking::{BookingError, ClaimRequest};
use crate::storage::{
    Guarded, NewSlot, NewSpace, Notification, Penalty, Reservation, ReservationState, Slot,
    SlotUpdate, Space, SpaceUpdate,
};

/// Parse an optional JSON body; an empty body yields the default.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid JSON body: {e}")))
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{field} is required")))
}

/// Reject fields that were supplied but left blank.
fn not_blank(fields: &[(&str, Option<&String>)]) -> Result<(), ApiError> {
    match fields
        .iter()
        .find(|(_, value)| value.is_some_and(|v| v.trim().is_empty()))
    {
        Some((name, _)) => Err(ApiError::validation(format!("{name} must not be blank"))),
        None => Ok(()),
    }
}

async fn existing_space(state: &AppState, id: &str) -> Result<Space, ApiError> {
    state
        .db
        .get_space(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Space not found: {id}")))
}

// =========================================================================
// Spaces and slots
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    available: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SlotFilter {
    free: Option<bool>,
}

/// `POST /spaces`
#[instrument(skip_all)]
pub async fn create_space(
    State(state): State<AppState>,
    Json(body): Json<NewSpace>,
) -> Result<(StatusCode, Json<Space>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    if body.capacity.is_some_and(|c| c < 0) {
        return Err(ApiError::validation("capacity must not be negative"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let space = state.db.create_space(&id, &body, unix_timestamp()).await?;
    Ok((StatusCode::CREATED, Json(space)))
}

/// `GET /spaces`
pub async fn list_spaces(State(state): State<AppState>) -> Result<Json<Vec<Space>>, ApiError> {
    Ok(Json(state.db.list_spaces().await?))
}

/// `GET /spaces/{id}`
pub async fn get_space(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Space>, ApiError> {
    Ok(Json(existing_space(&state, &id).await?))
}

/// `PUT /spaces/{id}`
#[instrument(skip(state, body))]
pub async fn update_space(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SpaceUpdate>,
) -> Result<Json<Space>, ApiError> {
    not_blank(&[("name", body.name.as_ref())])?;
    if body.capacity.is_some_and(|c| c < 0) {
        return Err(ApiError::validation("capacity must not be negative"));
    }

    state
        .db
        .update_space(&id, &body)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Space not found: {id}")))
}

/// `DELETE /spaces/{id}`: removes the space, its slots and their finished
/// reservations. Refused while any slot is held.
#[instrument(skip(state))]
pub async fn delete_space(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.db.delete_space(&id).await? {
        Guarded::Applied(()) => Ok(StatusCode::NO_CONTENT),
        Guarded::NotFound => Err(BookingError::SpaceNotFound(id).into()),
        Guarded::InUse => Err(BookingError::SpaceInUse(id).into()),
    }
}

/// `PUT /spaces/{id}/availability`
#[instrument(skip(state, body))]
pub async fn set_availability(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AvailabilityRequest>,
) -> Result<Json<Space>, ApiError> {
    if !state.db.set_space_availability(&id, body.available).await? {
        return Err(ApiError::not_found(format!("Space not found: {id}")));
    }
    Ok(Json(existing_space(&state, &id).await?))
}

/// `POST /spaces/{id}/slots`
#[instrument(skip(state, body))]
pub async fn create_slot(
    State(state): State<AppState>,
    Path(space_id): Path<String>,
    Json(body): Json<NewSlot>,
) -> Result<(StatusCode, Json<Slot>), ApiError> {
    if body.weekday.trim().is_empty()
        || body.opens_at.trim().is_empty()
        || body.closes_at.trim().is_empty()
    {
        return Err(ApiError::validation("weekday, opensAt and closesAt are required"));
    }
    existing_space(&state, &space_id).await?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = unix_timestamp();
    let slot = state.db.create_slot(&id, &space_id, &body, now).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

/// `GET /spaces/{id}/slots?free=`
pub async fn list_slots(
    State(state): State<AppState>,
    Path(space_id): Path<String>,
    Query(filter): Query<SlotFilter>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    existing_space(&state, &space_id).await?;
    let slots = state
        .db
        .list_slots(&space_id, filter.free.unwrap_or(false))
        .await?;
    Ok(Json(slots))
}

/// `GET /slots/{id}`
pub async fn get_slot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Slot>, ApiError> {
    state
        .db
        .get_slot(&id)
        .await?
        .map(Json)
        .ok_or_else(|| BookingError::SlotNotFound(id).into())
}

/// `PUT /slots/{id}`: reschedule a free slot.
#[instrument(skip(state, body))]
pub async fn update_slot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SlotUpdate>,
) -> Result<Json<Slot>, ApiError> {
    not_blank(&[
        ("weekday", body.weekday.as_ref()),
        ("opensAt", body.opens_at.as_ref()),
        ("closesAt", body.closes_at.as_ref()),
    ])?;

    match state.db.update_slot(&id, &body).await? {
        Guarded::Applied(slot) => Ok(Json(slot)),
        Guarded::NotFound => Err(BookingError::SlotNotFound(id).into()),
        Guarded::InUse => Err(BookingError::SlotInUse(id).into()),
    }
}

/// `DELETE /slots/{id}`
#[instrument(skip(state))]
pub async fn delete_slot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.db.delete_slot(&id).await? {
        Guarded::Applied(()) => Ok(StatusCode::NO_CONTENT),
        Guarded::NotFound => Err(BookingError::SlotNotFound(id).into()),
        Guarded::InUse => Err(BookingError::SlotInUse(id).into()),
    }
}

/// `POST /slots/{id}/release`: administrative override that frees a slot
/// regardless of the reservation holding it.
#[instrument(skip(state))]
pub async fn release_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<String>,
) -> Result<Json<Slot>, ApiError> {
    if !state.db.free_slot(&slot_id).await? {
        return Err(BookingError::SlotNotFound(slot_id).into());
    }
    state
        .db
        .get_slot(&slot_id)
        .await?
        .map(Json)
        .ok_or_else(|| BookingError::SlotNotFound(slot_id).into())
}

// =========================================================================
// Reservations
// =========================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateReservationRequest {
    slot_id: Option<String>,
    user_id: Option<String>,
    #[serde(alias = "startTime")]
    start: Option<i64>,
    #[serde(alias = "endTime")]
    end: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReservationFilter {
    state: Option<String>,
    #[serde(alias = "user_id")]
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PenalizeRequest {
    reason: Option<String>,
}

/// `POST /reservations`
#[instrument(skip_all)]
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(body): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let now = unix_timestamp();
    let request = ClaimRequest {
        slot_id: required(body.slot_id, "slotId")?,
        user_id: required(body.user_id, "userId")?,
        start_time: body.start.unwrap_or(now),
        end_time: body.end.unwrap_or(now),
    };
    if request.end_time < request.start_time {
        return Err(ApiError::validation("end must not be before start"));
    }

    let reservation = state.machine.create(&request, now).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// `GET /reservations?state=&userId=`
pub async fn list_reservations(
    State(state): State<AppState>,
    Query(filter): Query<ReservationFilter>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let reservation_state = filter
        .state
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<ReservationState>)
        .transpose()
        .map_err(ApiError::validation)?;
    let user_id = filter.user_id.as_deref().filter(|u| !u.trim().is_empty());

    Ok(Json(state.machine.list(reservation_state, user_id).await?))
}

/// `GET /reservations/{id}`
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.machine.get(&id).await?))
}

/// `POST /reservations/{id}/confirm`
pub async fn confirm_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.machine.confirm(&id, unix_timestamp()).await?))
}

/// `POST /reservations/{id}/reject`
pub async fn reject_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.machine.reject(&id, unix_timestamp()).await?))
}

/// `POST /reservations/{id}/penalize`
pub async fn penalize_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Penalty>), ApiError> {
    let body: PenalizeRequest = optional_json(&body)?;
    let penalty = state
        .machine
        .penalize(&id, body.reason.as_deref(), unix_timestamp())
        .await?;
    Ok((StatusCode::CREATED, Json(penalty)))
}

// =========================================================================
// Penalizations and users
// =========================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PenaltyFilter {
    #[serde(alias = "user_id")]
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PenalizeUserRequest {
    #[serde(alias = "user_id")]
    user_id: Option<String>,
    reason: Option<String>,
}

/// `GET /penalties?userId=`
pub async fn list_penalties(
    State(state): State<AppState>,
    Query(filter): Query<PenaltyFilter>,
) -> Result<Json<Vec<Penalty>>, ApiError> {
    let user_id = filter.user_id.as_deref().filter(|u| !u.trim().is_empty());
    Ok(Json(state.machine.penalties(user_id).await?))
}

/// `POST /penalties`
#[instrument(skip_all)]
pub async fn penalize_user(
    State(state): State<AppState>,
    Json(body): Json<PenalizeUserRequest>,
) -> Result<(StatusCode, Json<Penalty>), ApiError> {
    let user_id = required(body.user_id, "userId")?;
    let penalty = state
        .machine
        .penalize_user(&user_id, body.reason.as_deref(), unix_timestamp())
        .await?;
    Ok((StatusCode::CREATED, Json(penalty)))
}

/// `POST /penalties/{id}/lift`
pub async fn lift_penalty(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Penalty>, ApiError> {
    Ok(Json(state.machine.lift_penalty(&id).await?))
}

/// `GET /users/{id}/penalized`
pub async fn user_penalized(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let penalty = state
        .db
        .effective_penalty(&user_id, unix_timestamp())
        .await?;
    Ok(Json(json!({
        "userId": user_id,
        "penalized": penalty.is_some(),
        "until": penalty.map(|p| p.ends_at),
    })))
}

/// `GET /users/{id}/notifications`
pub async fn user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(state.db.list_notifications_for_user(&user_id).await?))
}
