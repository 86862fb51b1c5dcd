use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use lancer_core::Error;

/// HTTP boundary for the core error taxonomy. Every error maps to a stable
/// kind and message; internal detail never reaches the caller.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::InvalidState(_) | Error::DuplicateBid => StatusCode::CONFLICT,
            Error::Adapter(_) => StatusCode::BAD_GATEWAY,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Internal(e) => {
                // Detail goes to the log; the caller sees the generic shape
                error!("internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
