use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::validator::Violation;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation failed with {} violation(s)", .0.len())]
    ValidationFailed(Vec<Violation>),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("precondition violated: {0}")]
    PreconditionViolated(String),
}

impl AppError {
    pub fn precondition(message: impl Into<String>) -> Self {
        AppError::PreconditionViolated(message.into())
    }

    pub fn violations(&self) -> Option<&[Violation]> {
        match self {
            AppError::ValidationFailed(violations) => Some(violations),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::PreconditionViolated(_) => StatusCode::BAD_REQUEST,
            AppError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
        };

        let body = match &self {
            AppError::ValidationFailed(violations) => json!({
                "error": self.to_string(),
                "violations": violations,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
