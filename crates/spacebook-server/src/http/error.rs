//! HTTP error responses.
//!
//! Every failure is returned as `{"error": <message>, "code": <CODE>}` with a
//! status matching the code. Internal failures are logged and answered with
//! a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::booking::BookingError;
use crate::notifications::NotificationError;
use crate::storage::DatabaseError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
        }
    }

    fn internal(detail: &dyn std::fmt::Display) -> Self {
        error!(error = %detail, "Request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: "Internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
                code: self.code,
            }),
        )
            .into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        let (status, code) = match &e {
            BookingError::SlotNotFound(_)
            | BookingError::ReservationNotFound(_)
            | BookingError::PenaltyNotFound(_)
            | BookingError::SpaceNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            BookingError::SlotAlreadyOccupied(_) => (StatusCode::CONFLICT, "SLOT_ALREADY_OCCUPIED"),
            BookingError::SpaceUnavailable(_) => (StatusCode::CONFLICT, "SPACE_UNAVAILABLE"),
            BookingError::SlotInUse(_) => (StatusCode::CONFLICT, "SLOT_IN_USE"),
            BookingError::SpaceInUse(_) => (StatusCode::CONFLICT, "SPACE_IN_USE"),
            BookingError::UserPenalized { .. } => (StatusCode::FORBIDDEN, "USER_PENALIZED"),
            BookingError::AlreadyPenalized(_) => (StatusCode::CONFLICT, "ALREADY_PENALIZED"),
            BookingError::TooEarly { .. } => (StatusCode::CONFLICT, "TOO_EARLY"),
            BookingError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            BookingError::Persistence(_) => return Self::internal(&e),
        };
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl From<NotificationError> for ApiError {
    fn from(e: NotificationError) -> Self {
        Self::internal(&e)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::not_found(format!("Not found: {what}")),
            other => Self::internal(&other),
        }
    }
}
