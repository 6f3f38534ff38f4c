//! Real-time group chat built on a managed pub/sub service.
//!
//! The server side is a credential issuer that signs capability-scoped token
//! requests; the client side joins the shared room, tracks presence and
//! exchanges messages over the service.

pub mod chat;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod realtime;
pub mod services;

pub use config::{ClientConfig, Config};
pub use error::{AppError, ChatError, RealtimeError};
pub use handlers::http::AppState;
pub use services::TokenIssuer;

use axum::routing::get;
use handlers::http;
use tower_http::trace::TraceLayer;

/// Path the browser client historically called; `/credential` is an alias.
pub const TOKEN_PATH: &str = "/api/ably-token";

/// Build the issuer router. Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route(
            TOKEN_PATH,
            get(http::issue_token).options(http::token_preflight),
        )
        .route(
            "/credential",
            get(http::issue_token).options(http::token_preflight),
        )
        .route("/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
