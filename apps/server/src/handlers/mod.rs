pub mod admin;
pub mod client;
pub mod health;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::models::ApiResponse;
use crate::schedule::ScheduleError;

/// Seconds a client should wait after a transient storage failure.
const RETRY_AFTER_SECS: u64 = 1;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ScheduleError>;

impl IntoResponse for ScheduleError {
    fn into_response(self) -> Response {
        use ScheduleError::*;

        let status = match &self {
            InvalidDuration(_) | InvalidDate(_) | InvalidTime(_) | InvalidSlotId(_)
            | OutsideWorkingHours(_) | InvalidRequest(_) => StatusCode::BAD_REQUEST,
            NotFound(_) | UnknownProvider(_) => StatusCode::NOT_FOUND,
            SlotConflict(_) | AlreadyBooked(_) | InvalidState { .. } => StatusCode::CONFLICT,
            TransientStorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            Storage(e) => tracing::error!("storage error: {}", e),
            TransientStorageFailure(e) => tracing::warn!("transient storage failure: {}", e),
            _ => {}
        }

        let body = Json(ApiResponse::<()>::error(self.kind(), self.to_string()));
        if self.is_transient() {
            return (
                status,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                body,
            )
                .into_response();
        }
        (status, body).into_response()
    }
}

impl From<JsonRejection> for ScheduleError {
    fn from(rejection: JsonRejection) -> Self {
        ScheduleError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ScheduleError {
    fn from(rejection: QueryRejection) -> Self {
        ScheduleError::InvalidRequest(rejection.body_text())
    }
}
