//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::error::{IndexError, QueryError};

/// JSON body of every error response
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::SessionNotFound(id) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_details("Session not found", format!("Session ID: {id}")),
            ),
            ApiError::Query(err) if err.is_user_error() => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_details("Invalid request", err.to_string()),
            ),
            ApiError::Query(err) => {
                tracing::error!(error = %err, "query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Index store error", err.to_string()),
                )
            }
            ApiError::Index(err) => {
                tracing::error!(error = %err, "reindex failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Reindex failed", err.to_string()),
                )
            }
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::with_details("Conflict", msg.clone()),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Internal server error", msg.clone()),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
