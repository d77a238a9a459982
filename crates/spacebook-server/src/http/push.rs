//! Push subscription and messaging routes.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::{AppState, ApiError};
use crate::notifications::{
    DEFAULT_TITLE, NEW_RESERVATION_TITLE, PENALIZATION_TITLE, Payload, PushKeys, Target,
};
use crate::storage::Role;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscribeRequest {
    endpoint: Option<String>,
    keys: Option<PushKeys>,
    role: Option<Value>,
    #[serde(alias = "is_admin")]
    is_admin: Option<Value>,
    #[serde(alias = "user_id")]
    user_id: Option<Value>,
}

impl SubscribeRequest {
    /// A string `role` wins; otherwise an explicit admin flag; otherwise a
    /// boolean `role`.
    fn role(&self) -> Role {
        match &self.role {
            Some(Value::String(_)) => Role::normalize(self.role.as_ref()),
            _ => Role::normalize(self.is_admin.as_ref().or(self.role.as_ref())),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RemoveRequest {
    endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageRequest {
    message: Option<String>,
    title: Option<String>,
    role: Option<Value>,
    #[serde(alias = "user_id")]
    user_id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionSummary {
    endpoint: String,
    role: Role,
    user_id: Option<String>,
}

/// Stringify a user id sent as a string or a number.
fn user_id_from(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_message(message: Option<String>) -> Result<String, ApiError> {
    message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::validation("message is required"))
}

/// `POST /subscription`
#[instrument(skip_all)]
pub async fn subscribe(
    State(state): State<AppState>,
    Json(body): Json<SubscribeRequest>,
) -> Result<Json<Value>, ApiError> {
    let endpoint = body
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::validation("endpoint and keys are required"))?;
    let keys = body
        .keys
        .as_ref()
        .ok_or_else(|| ApiError::validation("endpoint and keys are required"))?;

    let role = body.role();
    let user_id = user_id_from(body.user_id.as_ref());
    state
        .registry
        .upsert(endpoint, role, user_id.as_deref(), keys)
        .await?;

    Ok(Json(json!({ "ok": true })))
}

/// `POST /subscription/remove`
#[instrument(skip_all)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<RemoveRequest>,
) -> Result<Json<Value>, ApiError> {
    let endpoint = body
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::validation("endpoint is required"))?;

    let removed = state.registry.remove(endpoint).await?;
    Ok(Json(json!({ "removed": removed })))
}

/// `GET /subscriptions`
pub async fn list_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SubscriptionSummary>>, ApiError> {
    let subscriptions = state
        .registry
        .list()
        .await?
        .into_iter()
        .map(|s| SubscriptionSummary {
            endpoint: s.endpoint,
            role: s.role,
            user_id: s.user_id,
        })
        .collect();
    Ok(Json(subscriptions))
}

/// `POST /new-message`
#[instrument(skip_all)]
pub async fn new_message(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let message = required_message(body.message)?;
    let role = body.role.as_ref().map(|r| Role::normalize(Some(r)));
    let target = Target::from_parts(role, user_id_from(body.user_id.as_ref()));
    let title = body.title.unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let report = state
        .dispatcher
        .dispatch(&target, &Payload::new(title, message))
        .await?;
    if report.attempted > 0 && report.sent == 0 {
        warn!(audience = ?target, attempted = report.attempted, "Message reached no subscriber");
    }

    Ok(Json(json!({
        "success": true,
        "sent": report.sent,
        "attempted": report.attempted,
    })))
}

/// `POST /new-reservation-admin`
pub async fn new_reservation_admin(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    notify_admins(&state, body, NEW_RESERVATION_TITLE).await
}

/// `POST /new-penalization-admin`
pub async fn new_penalization_admin(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    notify_admins(&state, body, PENALIZATION_TITLE).await
}

async fn notify_admins(
    state: &AppState,
    body: MessageRequest,
    default_title: &str,
) -> Result<Json<Value>, ApiError> {
    let message = required_message(body.message)?;
    let title = body.title.unwrap_or_else(|| default_title.to_string());

    let report = state
        .dispatcher
        .dispatch(&Target::Role(Role::Admin), &Payload::new(title, message))
        .await?;
    if report.attempted == 0 {
        return Err(ApiError::validation("no admin subscribers"));
    }

    info!(attempted = report.attempted, sent = report.sent, "Admin announcement dispatched");
    Ok(Json(json!({
        "success": true,
        "sent": report.sent,
        "attempted": report.attempted,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: Value) -> SubscribeRequest {
        serde_json::from_value(json).unwrap_or_default()
    }

    #[test]
    fn subscription_role_sources() {
        assert_eq!(request(json!({"role": "ADMIN"})).role(), Role::Admin);
        assert_eq!(request(json!({"role": "cliente", "isAdmin": true})).role(), Role::Client);
        assert_eq!(request(json!({"is_admin": true})).role(), Role::Admin);
        assert_eq!(request(json!({"isAdmin": false, "role": true})).role(), Role::Client);
        assert_eq!(request(json!({"role": true})).role(), Role::Admin);
        assert_eq!(request(json!({})).role(), Role::Client);
    }

    #[test]
    fn user_ids_accept_numbers() {
        assert_eq!(user_id_from(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(user_id_from(Some(&json!(" u-1 "))), Some("u-1".to_string()));
        assert_eq!(user_id_from(Some(&json!(""))), None);
        assert_eq!(user_id_from(Some(&Value::Null)), None);
        assert_eq!(user_id_from(None), None);
    }
}
