//! Error types for the credential issuer, the realtime client and the chat session.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Issuer-side errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Server secret missing; never carries the secret itself.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Token issuance failed. The detail is logged, never returned to the caller.
    #[error("Token issuance failed: {0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Upstream(_) | AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create authentication token".to_string(),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by a messaging-service connection.
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("service rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("not permitted: {0}")]
    Forbidden(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the chat session. A failed join is reported as one of these.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("credential request failed: {0}")]
    Credential(String),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error("display name must not be empty")]
    EmptyName,

    #[error("cannot join while {0}")]
    InvalidState(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;
