//! HTTP surface of the SpaceBook server.

pub mod booking;
pub mod error;
pub mod push;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use error::ApiError;

use crate::booking::ReservationStateMachine;
use crate::notifications::{NotificationDispatcher, SubscriptionRegistry};
use crate::storage::SpacebookDatabase;

/// Shared state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SpacebookDatabase,
    pub registry: SubscriptionRegistry,
    pub dispatcher: NotificationDispatcher,
    pub machine: Arc<ReservationStateMachine>,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
            )
        });

    Router::new()
        .route("/health", get(health))
        // Push subscriptions and announcements
        .route("/subscription", post(push::subscribe))
        .route("/subscription/remove", post(push::unsubscribe))
        .route("/subscriptions", get(push::list_subscriptions))
        .route("/new-message", post(push::new_message))
        .route("/new-reservation-admin", post(push::new_reservation_admin))
        .route("/new-penalization-admin", post(push::new_penalization_admin))
        // Spaces and slots
        .route("/spaces", post(booking::create_space).get(booking::list_spaces))
        .route(
            "/spaces/{id}",
            get(booking::get_space)
                .put(booking::update_space)
                .delete(booking::delete_space),
        )
        .route("/spaces/{id}/availability", put(booking::set_availability))
        .route(
            "/spaces/{id}/slots",
            post(booking::create_slot).get(booking::list_slots),
        )
        .route(
            "/slots/{id}",
            get(booking::get_slot)
                .put(booking::update_slot)
                .delete(booking::delete_slot),
        )
        .route("/slots/{id}/release", post(booking::release_slot))
        // Reservations
        .route(
            "/reservations",
            post(booking::create_reservation).get(booking::list_reservations),
        )
        .route("/reservations/{id}", get(booking::get_reservation))
        .route("/reservations/{id}/confirm", post(booking::confirm_reservation))
        .route("/reservations/{id}/reject", post(booking::reject_reservation))
        .route("/reservations/{id}/penalize", post(booking::penalize_reservation))
        // Penalizations and users
        .route(
            "/penalties",
            post(booking::penalize_user).get(booking::list_penalties),
        )
        .route("/penalties/{id}/lift", post(booking::lift_penalty))
        .route("/users/{id}/penalized", get(booking::user_penalized))
        .route("/users/{id}/notifications", get(booking::user_notifications))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /health`
async fn health(State(state): State<AppState>) -> (StatusCode, axum::Json<Value>) {
    match sqlx::query("SELECT 1").execute(state.db.pool()).await {
        Ok(_) => (StatusCode::OK, axum::Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
