//! Token request signing for the messaging service (HMAC-SHA256, base64 mac).

use crate::error::{AppError, AppResult};
use crate::models::message::CHAT_CHANNEL;
use crate::models::token::{Capability, TokenRequest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// A messaging-service API key, `<appId>.<keyId>:<secret>`.
#[derive(Clone)]
pub struct ApiKey {
    name: String,
    secret: String,
}

impl ApiKey {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let (name, secret) = raw
            .trim()
            .split_once(':')
            .ok_or_else(|| AppError::Upstream("API key must be <keyName>:<secret>".to_string()))?;
        if name.is_empty() || secret.is_empty() || !name.contains('.') {
            return Err(AppError::Upstream("malformed API key".to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            secret: secret.to_string(),
        })
    }

    /// `<appId>.<keyId>`; safe to expose.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("name", &self.name)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Issues token requests scoped to publish/subscribe/presence on the chat channel.
/// Stateless: issuing twice for the same client id yields two independent requests.
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    key: ApiKey,
    capability: Capability,
}

impl TokenIssuer {
    pub fn new(key: ApiKey) -> Self {
        Self {
            key,
            capability: Capability::chat(CHAT_CHANNEL),
        }
    }

    pub fn from_key_str(raw: &str) -> AppResult<Self> {
        ApiKey::parse(raw).map(Self::new)
    }

    pub fn key_name(&self) -> &str {
        self.key.name()
    }

    pub fn create_token_request(&self, client_id: &str) -> AppResult<TokenRequest> {
        if client_id.is_empty() {
            return Err(AppError::Validation("clientId is required".to_string()));
        }

        let mut request = TokenRequest {
            key_name: self.key.name.clone(),
            client_id: client_id.to_string(),
            capability: self.capability.to_json_string()?,
            timestamp: Utc::now().timestamp_millis(),
            nonce: hex::encode(rand::random::<[u8; 16]>()),
            mac: String::new(),
            ttl: None,
        };
        request.mac = self.sign(&request)?;
        debug!(client_id = %client_id, key_name = %request.key_name, "token request issued");
        Ok(request)
    }

    /// Check that `request` was signed with this key.
    pub fn verify(&self, request: &TokenRequest) -> AppResult<()> {
        if request.key_name != self.key.name {
            return Err(AppError::Validation("token request signed with unknown key".to_string()));
        }
        let invalid = || {
            debug!(client_id = %request.client_id, "token request mac mismatch");
            AppError::Validation("invalid token request signature".to_string())
        };
        let provided = BASE64.decode(&request.mac).map_err(|_| invalid())?;
        self.keyed_mac(request)?
            .verify_slice(&provided)
            .map_err(|_| invalid())
    }

    /// mac = base64(HMAC-SHA256(secret, keyName\nttl\ncapability\nclientId\ntimestamp\nnonce\n)).
    fn sign(&self, request: &TokenRequest) -> AppResult<String> {
        Ok(BASE64.encode(self.keyed_mac(request)?.finalize().into_bytes()))
    }

    fn keyed_mac(&self, request: &TokenRequest) -> AppResult<HmacSha256> {
        let ttl = request.ttl.map(|t| t.to_string()).unwrap_or_default();
        let sign_text = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            request.key_name,
            ttl,
            request.capability,
            request.client_id,
            request.timestamp,
            request.nonce
        );

        let mut mac = HmacSha256::new_from_slice(self.key.secret.as_bytes())
            .map_err(|e| AppError::Upstream(format!("HMAC init: {}", e)))?;
        mac.update(sign_text.as_bytes());
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::Operation;

    const KEY: &str = "appid.keyid:s3cr3t";

    #[test]
    fn test_token_request_scoped_to_chat_channel() {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        let req = issuer.create_token_request("Alice").unwrap();
        assert_eq!(req.key_name, "appid.keyid");
        assert_eq!(req.client_id, "Alice");
        assert!(req.ttl.is_none());

        let cap = req.capability().unwrap();
        assert_eq!(cap.channels().collect::<Vec<_>>(), vec![CHAT_CHANNEL]);
        assert_eq!(
            cap.operations(CHAT_CHANNEL),
            &[Operation::Publish, Operation::Subscribe, Operation::Presence]
        );
    }

    #[test]
    fn test_verify_token_request() {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        let req = issuer.create_token_request("Alice").unwrap();
        assert!(issuer.verify(&req).is_ok());
    }

    #[test]
    fn test_verify_fails_on_tampered_capability() {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        let mut req = issuer.create_token_request("Alice").unwrap();
        req.capability = r#"{"*":["publish","subscribe","presence"]}"#.to_string();
        assert!(issuer.verify(&req).is_err());
    }

    #[test]
    fn test_verify_fails_with_other_secret() {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        let other = TokenIssuer::from_key_str("appid.keyid:different").unwrap();
        let req = other.create_token_request("Alice").unwrap();
        assert!(issuer.verify(&req).is_err());
    }

    #[test]
    fn test_verify_fails_on_garbled_mac() {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        let mut req = issuer.create_token_request("Alice").unwrap();
        let original = req.mac.clone();

        req.mac = "not base64!".to_string();
        assert!(matches!(issuer.verify(&req), Err(AppError::Validation(_))));

        req.mac = original[..original.len() - 4].to_string();
        assert!(issuer.verify(&req).is_err());
    }

    #[test]
    fn test_same_client_id_issues_twice() {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        let a = issuer.create_token_request("Alice").unwrap();
        let b = issuer.create_token_request("Alice").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(a.nonce.len(), 32);
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        assert!(matches!(
            issuer.create_token_request(""),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_malformed_key_is_upstream_fault() {
        assert!(matches!(
            TokenIssuer::from_key_str("no-secret-here"),
            Err(AppError::Upstream(_))
        ));
        assert!(matches!(
            TokenIssuer::from_key_str("nodot:secret"),
            Err(AppError::Upstream(_))
        ));
    }

    #[test]
    fn test_api_key_debug_redacts_secret() {
        let key = ApiKey::parse(KEY).unwrap();
        assert!(!format!("{:?}", key).contains("s3cr3t"));
    }
}
