//! Application configuration loaded from environment.

use std::fmt;
use std::net::SocketAddr;

/// Default path of the credential endpoint on the issuer.
pub const DEFAULT_ISSUER_URL: &str = "http://127.0.0.1:3000/api/ably-token";
pub const DEFAULT_REST_HOST: &str = "rest.ably.io";
pub const DEFAULT_REALTIME_HOST: &str = "realtime.ably.io";

/// Credential issuer configuration loaded from `.env` and environment variables.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (e.g. `0.0.0.0:3000`).
    pub server_addr: SocketAddr,
    /// Messaging-service API key (`<appId>.<keyId>:<secret>`).
    /// Absence is reported per request, not at startup.
    pub ably_api_key: Option<String>,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_addr", &self.server_addr)
            .field("ably_api_key", &self.ably_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let server_addr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;

        let ably_api_key = non_empty_var("ABLY_API_KEY")
            .or_else(|| non_empty_var("NEXT_PUBLIC_ABLY_API_KEY"));
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server_addr,
            ably_api_key,
            log_level,
        })
    }
}

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL of the credential endpoint; `clientId` is appended as a query parameter.
    pub issuer_url: String,
    /// REST host used for token exchange and presence snapshots.
    pub rest_host: String,
    /// Realtime WebSocket host.
    pub realtime_host: String,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
            rest_host: DEFAULT_REST_HOST.to_string(),
            realtime_host: DEFAULT_REALTIME_HOST.to_string(),
            log_level: "warn".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let defaults = Self::default();
        let issuer_url = non_empty_var("CHAT_ISSUER_URL").unwrap_or(defaults.issuer_url);
        if !issuer_url.starts_with("http://") && !issuer_url.starts_with("https://") {
            return Err(ConfigLoadError::InvalidIssuerUrl(issuer_url));
        }

        Ok(Self {
            issuer_url,
            rest_host: non_empty_var("ABLY_REST_HOST").unwrap_or(defaults.rest_host),
            realtime_host: non_empty_var("ABLY_REALTIME_HOST").unwrap_or(defaults.realtime_host),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid CHAT_ISSUER_URL: {0}")]
    InvalidIssuerUrl(String),
}
