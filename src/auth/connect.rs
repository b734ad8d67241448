//! HTTP client for the Connect identity service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::auth::tokens::TokenManager;
use crate::config::ConnectConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectUser {
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

struct CachedUsers {
    fetched_at: Instant,
    users: Vec<ConnectUser>,
}

pub struct ConnectClient {
    http: reqwest::Client,
    base_url: String,
    cache_ttl: Duration,
    tokens: Arc<TokenManager>,
    users_cache: RwLock<Option<CachedUsers>>,
}

impl ConnectClient {
    pub fn new(config: &ConnectConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: config.url.trim_end_matches('/').to_string(),
            cache_ttl: Duration::from_secs(config.users_cache_ttl_secs),
            tokens,
            users_cache: RwLock::new(None),
        }
    }

    /// User directory from Connect. Failures degrade to an empty list so the
    /// review workflow keeps working when Connect is down.
    pub async fn get_users(&self) -> Vec<ConnectUser> {
        {
            let cache = self.users_cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return entry.users.clone();
                }
            }
        }

        let users = match self.fetch_users().await {
            Ok(users) => {
                info!("Fetched {} users from Connect", users.len());
                users
            }
            Err(e) => {
                warn!("Failed to fetch users from Connect: {e}");
                return Vec::new();
            }
        };

        let mut cache = self.users_cache.write().await;
        *cache = Some(CachedUsers {
            fetched_at: Instant::now(),
            users: users.clone(),
        });
        users
    }

    pub async fn user_name(&self, email: &str) -> String {
        self.get_users()
            .await
            .into_iter()
            .find(|u| u.email == email)
            .map(|u| u.name)
            .unwrap_or_else(|| email.to_string())
    }

    pub async fn clear_cache(&self) {
        let mut cache = self.users_cache.write().await;
        *cache = None;
    }

    async fn fetch_users(&self) -> anyhow::Result<Vec<ConnectUser>> {
        let token = self.tokens.service_token().await?;
        let url = format!("{}/api/users", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("Connect returned HTTP {}", response.status());
        }
        Ok(response.json::<Vec<ConnectUser>>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(url: &str) -> ConnectClient {
        let config = ConnectConfig {
            url: url.to_string(),
            secret_key: "connect-shared-secret-for-testing-purposes-only".into(),
            service_issuer: "legal-reviews".into(),
            trusted_issuer: "connect".into(),
            service_token_ttl_secs: 3600,
            users_cache_ttl_secs: 300,
        };
        let tokens = Arc::new(TokenManager::with_secrets(
            &config.secret_key,
            "application-secret-key-for-testing-purposes",
            &config.service_issuer,
            &config.trusted_issuer,
            config.service_token_ttl_secs,
        ));
        ConnectClient::new(&config, tokens)
    }

    #[tokio::test]
    async fn test_get_users_uses_bearer_token_and_caches() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/users")
            .match_header("authorization", mockito::Matcher::Regex("^Bearer .+".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"email":"ana@example.com","name":"Ana Souza"}]"#)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let first = client.get_users().await;
        let second = client.get_users().await;

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].email, "ana@example.com");
        assert_eq!(second.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_users_degrades_to_empty_on_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/users")
            .with_status(500)
            .create_async()
            .await;

        let client = test_client(&server.url());
        assert!(client.get_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_name_falls_back_to_email() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/users")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let client = test_client(&server.url());
        assert_eq!(client.user_name("ghost@example.com").await, "ghost@example.com");
    }
}
