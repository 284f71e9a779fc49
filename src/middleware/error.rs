use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::bounce::{BounceResponse, RETRY_INVALID_SESSION_HEADER};
use crate::error::SessionError;

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match self {
            Self::Inactive => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            Self::Exchange(_) | Self::Store(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Session resolution failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl IntoResponse for BounceResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized { body } => (
                StatusCode::UNAUTHORIZED,
                [(RETRY_INVALID_SESSION_HEADER, "1")],
                Json(body),
            )
                .into_response(),
            Self::Redirect { location, .. } => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
        }
    }
}
