//! Server error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use riskflow_runtime::ServiceError;
use serde_json::json;
use thiserror::Error;

/// Server error type
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let error_message = match self {
            ServerError::InvalidRequest(msg)
            | ServerError::NotFound(msg)
            | ServerError::Conflict(msg)
            | ServerError::InternalError(msg) => msg,
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<ServiceError> for ServerError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => ServerError::InvalidRequest(e.to_string()),
            ServiceError::NotFound(msg) => ServerError::NotFound(msg),
            ServiceError::Conflict(msg) => ServerError::Conflict(msg),
            err @ (ServiceError::Storage(_) | ServiceError::Internal(_)) => {
                ServerError::InternalError(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::InternalError(err.to_string())
    }
}
