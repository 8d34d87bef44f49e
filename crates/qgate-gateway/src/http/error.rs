use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use qgate_core::error::QgateError;

/// `QgateError` rendered as `{"error": CODE, "message": ...}`.
#[derive(Debug)]
pub struct ApiError(pub QgateError);

impl From<QgateError> for ApiError {
    fn from(e: QgateError) -> Self {
        Self(e)
    }
}

pub fn status_of(e: &QgateError) -> StatusCode {
    match e {
        QgateError::BadRequest(_) | QgateError::UnsupportedVersion => StatusCode::BAD_REQUEST,
        QgateError::AuthFailed => StatusCode::UNAUTHORIZED,
        QgateError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        QgateError::Handler(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QgateError::Transport(_) => StatusCode::BAD_GATEWAY,
        QgateError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        QgateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        let message = match &self.0 {
            // the handler's own message, unprefixed
            QgateError::Handler(msg) => msg.clone(),
            e => e.to_string(),
        };
        let body = json!({
            "error": self.0.client_code().as_str(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}
