//! Error taxonomy shared by intake, generation and the deploy endpoint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GradeError {
    /// A required request field is absent.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field is present but malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid secret")]
    Auth,

    #[error("Template {0} not found")]
    TemplateNotFound(String),

    #[error("existing task id required for round 2")]
    MissingTaskId,

    /// Nonce unknown, or not bound to this (identity, task, round).
    #[error("Invalid task, round, or nonce")]
    InvalidNonce,

    /// LLM, repository host or browser failure outside a check boundary.
    #[error("External service error: {0}")]
    External(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl GradeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GradeError::MissingField(_) | GradeError::Validation(_) | GradeError::InvalidNonce => {
                StatusCode::BAD_REQUEST
            }
            GradeError::Auth => StatusCode::UNAUTHORIZED,
            GradeError::TemplateNotFound(_) | GradeError::MissingTaskId => StatusCode::NOT_FOUND,
            GradeError::External(_) | GradeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GradeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
