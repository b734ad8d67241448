use anyhow::{bail, Result};
use std::path::PathBuf;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub connect: ConnectConfig,
    pub uploads: UploadConfig,
    pub secret_key: String,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone)]
pub struct ConnectConfig {
    pub url: String,
    pub secret_key: String,
    pub service_issuer: String,
    pub trusted_issuer: String,
    pub service_token_ttl_secs: i64,
    pub users_cache_ttl_secs: u64,
}

#[derive(Clone)]
pub struct UploadConfig {
    pub root: PathBuf,
    pub max_size: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let secret_key = match std::env::var("SECRET_KEY") {
            Ok(v) if v.len() >= 32 => v,
            Ok(_) => bail!("SECRET_KEY must be at least 32 characters"),
            Err(_) => bail!("SECRET_KEY not set"),
        };
        let connect_secret = match std::env::var("CONNECT_SECRET_KEY") {
            Ok(v) if v.len() >= 32 => v,
            Ok(_) => bail!("CONNECT_SECRET_KEY must be at least 32 characters"),
            Err(_) => bail!("CONNECT_SECRET_KEY not set"),
        };

        let database_url = env_or(
            "DATABASE_URL",
            "postgres://reviews:@localhost:5432/legal_reviews",
        );

        Ok(Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_or("SERVER_PORT", "8080").parse().unwrap_or(8080),
            },
            database: DatabaseConfig { url: database_url },
            connect: ConnectConfig {
                url: env_or("CONNECT_URL", "http://localhost:5001"),
                secret_key: connect_secret,
                service_issuer: env_or("SERVICE_ISSUER", "legal-reviews"),
                trusted_issuer: env_or("CONNECT_ISSUER", "connect"),
                service_token_ttl_secs: env_or("SERVICE_TOKEN_TTL_SECS", "3600")
                    .parse()
                    .unwrap_or(3600),
                users_cache_ttl_secs: env_or("CONNECT_USERS_CACHE_TTL_SECS", "300")
                    .parse()
                    .unwrap_or(300),
            },
            uploads: UploadConfig {
                root: PathBuf::from(env_or("UPLOAD_FOLDER", "uploads/reviews")),
                max_size: env_or("MAX_UPLOAD_SIZE", "10485760").parse().unwrap_or(10 * 1024 * 1024),
            },
            secret_key,
        })
    }
}
