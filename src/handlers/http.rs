//! HTTP handlers: credential issuance, CORS preflight and health.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::{debug, error, info};
use validator::Validate;

use crate::error::AppError;
use crate::models::token::TokenRequest;
use crate::services::TokenIssuer;

/// Shared application state.
#[derive(Clone, Default)]
pub struct AppState {
    /// Messaging-service API key; `None` makes every issuance request a 500.
    pub ably_api_key: Option<String>,
}

impl AppState {
    pub fn new(ably_api_key: Option<String>) -> Self {
        Self { ably_api_key }
    }
}

#[derive(Debug, Default, Validate)]
pub struct TokenQuery {
    #[validate(length(min = 1))]
    pub client_id: Option<String>,
}

impl TokenQuery {
    /// The first `clientId` wins when the parameter repeats.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let client_id = pairs
            .into_iter()
            .find(|(name, _)| name == "clientId")
            .map(|(_, value)| value);
        Self { client_id }
    }
}

/// GET /api/ably-token?clientId=<name> — sign a token request for the chat channel.
pub async fn issue_token(
    State(state): State<AppState>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<TokenRequest>, AppError> {
    let api_key = state.ably_api_key.as_deref().ok_or_else(|| {
        error!("ABLY_API_KEY is not set; cannot issue credentials");
        AppError::Config("Ably API key is not configured".to_string())
    })?;

    let query = match params {
        Ok(Query(pairs)) => TokenQuery::from_pairs(pairs),
        Err(rejection) => {
            debug!(error = %rejection, "unreadable query string");
            TokenQuery::default()
        }
    };
    let client_id = match (query.validate(), query.client_id.as_deref()) {
        (Ok(()), Some(id)) => id,
        _ => return Err(AppError::Validation("clientId is required".to_string())),
    };

    let token_request = TokenIssuer::from_key_str(api_key)
        .and_then(|issuer| issuer.create_token_request(client_id))
        .inspect_err(|e| error!(error = %e, "error creating token request"))?;

    info!(client_id = %client_id, "credential issued");
    Ok(Json(token_request))
}

/// OPTIONS /api/ably-token — permissive CORS preflight.
pub async fn token_preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
}

/// GET /health — liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "roomchat" })),
    )
}
