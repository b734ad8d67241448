//! Signed-token handling: service-to-service tokens shared with Connect,
//! session tokens for browser clients and one-shot approval-link tokens.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Service,
    Session,
    Approval,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Session => "session",
            Self::Approval => "approval",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Claims carried by a Connect sign-in token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectLoginClaims {
    pub iss: String,
    pub user_email: String,
    pub user_name: String,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub name: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalClaims {
    pub review_id: Uuid,
    pub approver_email: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Seconds before expiry at which a cached service token stops being reused.
const SERVICE_TOKEN_REFRESH_WINDOW_SECS: i64 = 60;

const SESSION_TTL_HOURS: i64 = 24;
const APPROVAL_TTL_HOURS: i64 = 24;

pub struct TokenManager {
    connect_encoding: EncodingKey,
    connect_decoding: DecodingKey,
    app_encoding: EncodingKey,
    app_decoding: DecodingKey,
    service_issuer: String,
    trusted_issuer: String,
    service_token_ttl_secs: i64,
    cached_service_token: RwLock<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_secrets(
            &config.connect.secret_key,
            &config.secret_key,
            &config.connect.service_issuer,
            &config.connect.trusted_issuer,
            config.connect.service_token_ttl_secs,
        )
    }

    pub fn with_secrets(
        connect_secret: &str,
        app_secret: &str,
        service_issuer: &str,
        trusted_issuer: &str,
        service_token_ttl_secs: i64,
    ) -> Self {
        Self {
            connect_encoding: EncodingKey::from_secret(connect_secret.as_bytes()),
            connect_decoding: DecodingKey::from_secret(connect_secret.as_bytes()),
            app_encoding: EncodingKey::from_secret(app_secret.as_bytes()),
            app_decoding: DecodingKey::from_secret(app_secret.as_bytes()),
            service_issuer: service_issuer.to_string(),
            trusted_issuer: trusted_issuer.to_string(),
            service_token_ttl_secs,
            cached_service_token: RwLock::new(None),
        }
    }

    /// Bearer token for outgoing Connect API calls. Cached and reused until
    /// it enters the refresh window, then minted anew.
    pub async fn service_token(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        {
            let cached = self.cached_service_token.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.expires_at - now > SERVICE_TOKEN_REFRESH_WINDOW_SECS {
                    return Ok(entry.token.clone());
                }
            }
        }

        let expires_at = now + self.service_token_ttl_secs;
        let claims = ServiceClaims {
            iss: self.service_issuer.clone(),
            exp: expires_at,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            token_type: TokenType::Service.as_str().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.connect_encoding)
            .map_err(|e| anyhow!("Failed to encode service token: {e}"))?;

        let mut cached = self.cached_service_token.write().await;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        debug!("Minted new service token for issuer {}", self.service_issuer);
        Ok(token)
    }

    /// Verify an incoming service token: signature, issuer, type and expiry
    /// must all check out.
    pub fn verify_service_token(&self, token: &str) -> Result<ServiceClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.trusted_issuer, &self.service_issuer]);
        let data = decode::<ServiceClaims>(token, &self.connect_decoding, &validation)
            .map_err(|e| anyhow!("Service token validation failed: {e}"))?;
        if data.claims.token_type != TokenType::Service.as_str() {
            return Err(anyhow!("Token is not a service token"));
        }
        Ok(data.claims)
    }

    /// Verify a Connect-issued sign-in token against the shared secret.
    pub fn verify_connect_login_token(&self, token: &str) -> Result<ConnectLoginClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.trusted_issuer]);
        let data = decode::<ConnectLoginClaims>(token, &self.connect_decoding, &validation)
            .map_err(|e| anyhow!("Connect token validation failed: {e}"))?;
        Ok(data.claims)
    }

    pub fn issue_session_token(
        &self,
        email: &str,
        name: &str,
        profile_name: Option<String>,
        actions: Option<Vec<String>>,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: email.to_string(),
            name: name.to_string(),
            exp: (now + Duration::hours(SESSION_TTL_HOURS)).timestamp(),
            iat: now.timestamp(),
            token_type: TokenType::Session.as_str().to_string(),
            profile_name,
            actions,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.app_encoding)
            .map_err(|e| anyhow!("Failed to encode session token: {e}"))
    }

    pub fn verify_session_token(&self, token: &str) -> Result<SessionClaims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<SessionClaims>(token, &self.app_decoding, &validation)
            .map_err(|e| anyhow!("Session token validation failed: {e}"))?;
        if data.claims.token_type != TokenType::Session.as_str() {
            return Err(anyhow!("Token is not a session token"));
        }
        Ok(data.claims)
    }

    pub fn issue_approval_token(&self, review_id: Uuid, approver_email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = ApprovalClaims {
            review_id,
            approver_email: approver_email.to_string(),
            exp: (now + Duration::hours(APPROVAL_TTL_HOURS)).timestamp(),
            iat: now.timestamp(),
            token_type: TokenType::Approval.as_str().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.app_encoding)
            .map_err(|e| anyhow!("Failed to encode approval token: {e}"))
    }

    pub fn verify_approval_token(&self, token: &str) -> Result<ApprovalClaims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<ApprovalClaims>(token, &self.app_decoding, &validation)
            .map_err(|e| anyhow!("Approval token validation failed: {e}"))?;
        if data.claims.token_type != TokenType::Approval.as_str() {
            return Err(anyhow!("Token is not an approval token"));
        }
        Ok(data.claims)
    }
}

pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECT_SECRET: &str = "connect-shared-secret-for-testing-purposes-only";
    const APP_SECRET: &str = "application-secret-key-for-testing-purposes";

    fn create_test_manager() -> TokenManager {
        TokenManager::with_secrets(CONNECT_SECRET, APP_SECRET, "legal-reviews", "connect", 3600)
    }

    #[tokio::test]
    async fn test_service_token_round_trip() {
        let manager = create_test_manager();
        let token = manager.service_token().await.expect("Failed to mint");
        let claims = manager
            .verify_service_token(&token)
            .expect("Validation failed");
        assert_eq!(claims.iss, "legal-reviews");
        assert_eq!(claims.token_type, "service");
    }

    #[tokio::test]
    async fn test_service_token_is_cached() {
        let manager = create_test_manager();
        let first = manager.service_token().await.expect("Failed to mint");
        let second = manager.service_token().await.expect("Failed to mint");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_service_token_reminted_inside_refresh_window() {
        let manager =
            TokenManager::with_secrets(CONNECT_SECRET, APP_SECRET, "legal-reviews", "connect", 30);
        let first = manager.service_token().await.expect("Failed to mint");
        // A 30s ttl is already within the 60s refresh window, so the cache
        // never satisfies the second call.
        let second = manager.service_token().await.expect("Failed to mint");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let minter =
            TokenManager::with_secrets(CONNECT_SECRET, APP_SECRET, "intruder", "intruder", 3600);
        let verifier = create_test_manager();
        let token = minter.service_token().await.expect("Failed to mint");
        assert!(verifier.verify_service_token(&token).is_err());
    }

    #[test]
    fn test_expired_service_token_rejected() {
        let manager = create_test_manager();
        let now = Utc::now().timestamp();
        let claims = ServiceClaims {
            iss: "connect".into(),
            exp: now - 3600,
            iat: now - 7200,
            jti: Uuid::new_v4().to_string(),
            token_type: "service".into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(CONNECT_SECRET.as_bytes()),
        )
        .expect("Failed to encode");
        assert!(manager.verify_service_token(&token).is_err());
    }

    #[test]
    fn test_session_token_round_trip() {
        let manager = create_test_manager();
        let token = manager
            .issue_session_token(
                "ana@example.com",
                "Ana Souza",
                Some("Legal".into()),
                Some(vec!["editar".into()]),
            )
            .expect("Failed to issue");
        let claims = manager.verify_session_token(&token).expect("Validation failed");
        assert_eq!(claims.sub, "ana@example.com");
        assert_eq!(claims.actions, Some(vec!["editar".to_string()]));
    }

    #[test]
    fn test_session_token_not_accepted_as_service_token() {
        let manager = create_test_manager();
        let token = manager
            .issue_session_token("ana@example.com", "Ana Souza", None, None)
            .expect("Failed to issue");
        assert!(manager.verify_service_token(&token).is_err());
    }

    #[test]
    fn test_approval_token_binds_review_and_approver() {
        let manager = create_test_manager();
        let review_id = Uuid::new_v4();
        let token = manager
            .issue_approval_token(review_id, "bob@example.com")
            .expect("Failed to issue");
        let claims = manager.verify_approval_token(&token).expect("Validation failed");
        assert_eq!(claims.review_id, review_id);
        assert_eq!(claims.approver_email, "bob@example.com");
    }

    #[test]
    fn test_approval_token_rejected_as_session() {
        let manager = create_test_manager();
        let token = manager
            .issue_approval_token(Uuid::new_v4(), "bob@example.com")
            .expect("Failed to issue");
        assert!(manager.verify_session_token(&token).is_err());
    }

    #[test]
    fn test_connect_login_token_round_trip() {
        let manager = create_test_manager();
        let now = Utc::now();
        let claims = ConnectLoginClaims {
            iss: "connect".into(),
            user_email: "ana@example.com".into(),
            user_name: "Ana Souza".into(),
            exp: (now + Duration::hours(1)).timestamp(),
            profile_name: Some("Jurídico".into()),
            actions: Some(vec!["consultar".into(), "editar".into()]),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(CONNECT_SECRET.as_bytes()),
        )
        .expect("Failed to encode");
        let verified = manager
            .verify_connect_login_token(&token)
            .expect("Validation failed");
        assert_eq!(verified.user_email, "ana@example.com");
        assert_eq!(verified.actions, Some(vec!["consultar".to_string(), "editar".to_string()]));
    }

    #[test]
    fn test_connect_login_token_wrong_issuer_rejected() {
        let manager = create_test_manager();
        let now = Utc::now();
        let claims = ConnectLoginClaims {
            iss: "somebody-else".into(),
            user_email: "ana@example.com".into(),
            user_name: "Ana Souza".into(),
            exp: (now + Duration::hours(1)).timestamp(),
            profile_name: None,
            actions: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(CONNECT_SECRET.as_bytes()),
        )
        .expect("Failed to encode");
        assert!(manager.verify_connect_login_token(&token).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Basic abc123"), None);
    }
}
