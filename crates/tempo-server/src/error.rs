use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tempo_core::error::CoordinatorError;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::Conflict(m)
            | Self::Internal(m) => write!(f, "{m}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            Self::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            Self::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Map a coordinator-level validation failure onto the hub/REST error
/// surface (validation failures never mutate state, the caller
/// gets the rule name back).
impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::InvalidState(_) | CoordinatorError::InvalidStateChange(_) => {
                AppError::BadRequest(err.to_string())
            },
            CoordinatorError::InvalidPassword => AppError::Unauthorized(err.to_string()),
            CoordinatorError::NotHost | CoordinatorError::UserBlocked | CoordinatorError::UserBlocksPMs => {
                AppError::Forbidden(err.to_string())
            },
            CoordinatorError::NotJoinedRoom | CoordinatorError::NotTracked => {
                AppError::NotFound(err.to_string())
            },
            CoordinatorError::StaleConnection => AppError::Conflict(err.to_string()),
            CoordinatorError::Timeout => AppError::Internal(err.to_string()),
        }
    }
}
