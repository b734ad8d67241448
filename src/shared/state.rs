use crate::auth::connect::ConnectClient;
use crate::auth::tokens::TokenManager;
use crate::config::AppConfig;
use crate::shared::utils::DbPool;
use std::sync::Arc;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub tokens: Arc<TokenManager>,
    pub connect: Arc<ConnectClient>,
}

impl AppState {
    pub fn new(conn: DbPool, config: AppConfig) -> Self {
        let tokens = Arc::new(TokenManager::new(&config));
        let connect = Arc::new(ConnectClient::new(&config.connect, Arc::clone(&tokens)));
        Self {
            conn,
            config,
            tokens,
            connect,
        }
    }
}
