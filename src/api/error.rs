use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::error::{DatabaseError, Error, ProviderError};

/// Error returned by handlers; renders as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request that never reached the service layer.
    BadRequest(String),
    Service(Error),
}

impl ApiError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::Service(Error::Database(DatabaseError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Service(err) => match err {
                Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                Error::Rule(_) => StatusCode::BAD_REQUEST,
                Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
                Error::Database(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                Error::Provider(ProviderError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
                Error::Provider(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self::Service(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Service(err) => err.to_string(),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {message}");
        } else if status != StatusCode::NOT_FOUND {
            warn!(status = status.as_u16(), "Request rejected: {message}");
        }

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
