use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::AppointmentState;

/* -------------------------
   Domain errors
--------------------------*/

/// Appointment-layer error taxonomy. The policy engine, the stores and the
/// lifecycle controller all speak this type; the HTTP layer converts it to
/// an `ApiError` with a stable code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("{0}")]
    Validation(String),

    #[error("active appointment limit reached ({limit})")]
    QuotaExceeded { limit: i64 },

    #[error("{0}")]
    Forbidden(String),

    #[error("appointment not found")]
    NotFound,

    #[error("the requested slot is already taken")]
    SlotConflict,

    #[error("cannot move appointment from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        from: AppointmentState,
        to: AppointmentState,
    },

    #[error("appointment is already cancelled")]
    AlreadyCancelled,

    #[error("appointment can no longer be cancelled")]
    NotCancellable,

    #[error("store error: {0}")]
    Store(String),
}

/* -------------------------
   HTTP error envelope
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<AppointmentError> for ApiError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::Validation(msg) => ApiError::BadRequest("VALIDATION_ERROR", msg),
            AppointmentError::QuotaExceeded { .. } => {
                ApiError::BadRequest("QUOTA_EXCEEDED", e.to_string())
            }
            AppointmentError::Forbidden(msg) => ApiError::Forbidden("FORBIDDEN", msg),
            AppointmentError::NotFound => {
                ApiError::NotFound("NOT_FOUND", "appointment not found".into())
            }
            AppointmentError::SlotConflict => ApiError::Conflict("SLOT_CONFLICT", e.to_string()),
            AppointmentError::InvalidTransition { .. } => {
                ApiError::Conflict("INVALID_TRANSITION", e.to_string())
            }
            AppointmentError::AlreadyCancelled => {
                ApiError::Conflict("ALREADY_CANCELLED", e.to_string())
            }
            AppointmentError::NotCancellable => {
                ApiError::Conflict("NOT_CANCELLABLE", e.to_string())
            }
            AppointmentError::Store(msg) => ApiError::Internal(format!("store error: {msg}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}
