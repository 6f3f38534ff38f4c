//! Fetching a credential from the issuer.

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::models::token::TokenRequest;
use crate::services::TokenIssuer;

/// Something that hands out a credential for a client id.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, client_id: &str) -> ChatResult<TokenRequest>;
}

/// Calls the issuer's HTTP endpoint: `GET <issuer_url>?clientId=<name>`.
#[derive(Clone)]
pub struct HttpCredentialSource {
    http: reqwest::Client,
    issuer_url: String,
}

impl HttpCredentialSource {
    pub fn new(issuer_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            issuer_url: issuer_url.into(),
        }
    }

    fn url_for(&self, client_id: &str) -> ChatResult<Url> {
        Url::parse_with_params(&self.issuer_url, &[("clientId", client_id)])
            .map_err(|e| ChatError::Credential(format!("invalid issuer URL: {e}")))
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self, client_id: &str) -> ChatResult<TokenRequest> {
        let url = self.url_for(client_id)?;
        debug!(url = %url, "requesting credential");
        let body: serde_json::Value = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ChatError::Credential(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChatError::Credential(e.to_string()))?;
        parse_credential(body)
    }
}

/// An `error` field wins over everything else in the body.
fn parse_credential(body: serde_json::Value) -> ChatResult<TokenRequest> {
    if let Some(error) = body.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ChatError::Credential(message));
    }
    Ok(serde_json::from_value(body)?)
}

/// In-process issuance, for running the issuer and client in one process.
#[async_trait]
impl CredentialSource for TokenIssuer {
    async fn fetch(&self, client_id: &str) -> ChatResult<TokenRequest> {
        self.create_token_request(client_id)
            .map_err(|e| ChatError::Credential(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_encodes_client_id() {
        let source = HttpCredentialSource::new("http://localhost:3000/api/ably-token");
        let url = source.url_for("Ada Lovelace&co").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/api/ably-token?clientId=Ada+Lovelace%26co"
        );
    }

    #[test]
    fn error_body_is_credential_error() {
        let err = parse_credential(json!({ "error": "Ably API key is not configured" })).unwrap_err();
        assert!(matches!(err, ChatError::Credential(ref m) if m == "Ably API key is not configured"));
    }

    #[test]
    fn parses_token_request_body() {
        let body = json!({
            "keyName": "app.key",
            "clientId": "Alice",
            "capability": "{\"chat-room\":[\"publish\",\"subscribe\",\"presence\"]}",
            "timestamp": 1_700_000_000_000_i64,
            "nonce": "0123456789abcdef",
            "mac": "c2ln"
        });
        let req = parse_credential(body).unwrap();
        assert_eq!(req.client_id, "Alice");
        assert!(req.ttl.is_none());
    }

    #[tokio::test]
    async fn issuer_is_a_credential_source() {
        let issuer = TokenIssuer::from_key_str("app.key:secret").unwrap();
        let req = issuer.fetch("Alice").await.unwrap();
        assert!(issuer.verify(&req).is_ok());
        assert!(issuer.fetch("").await.is_err());
    }
}
