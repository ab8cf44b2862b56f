use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jetset_core::CoreError;
use serde_json::json;

const REFRESH_AND_RETRY: &str =
    "This quote was changed by someone else or can no longer take this action. Please refresh and retry.";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Core(err) => {
                let status = match err {
                    CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
                    CoreError::NotFoundError(_) => StatusCode::NOT_FOUND,
                    CoreError::InventoryUnavailable { .. }
                    | CoreError::StateConflict(_)
                    | CoreError::PaymentMissing(_) => StatusCode::CONFLICT,
                    CoreError::ExternalServiceError(_) | CoreError::InternalError(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let message = match err {
                    CoreError::StateConflict(_) => REFRESH_AND_RETRY.to_string(),
                    CoreError::InventoryUnavailable { requested, available } => format!(
                        "Not enough seats available: requested {}, available {}",
                        requested, available
                    ),
                    CoreError::ExternalServiceError(_) | CoreError::InternalError(_) => {
                        "Internal Server Error".to_string()
                    }
                    other => other.to_string(),
                };
                (status, err.code(), message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(code, "Internal Server Error: {}", self);
        } else if let AppError::Core(CoreError::StateConflict(detail)) = &self {
            tracing::debug!(detail = %detail, "Rejected stale or invalid transition");
        }

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// `Json` extractor whose rejections use the API error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
