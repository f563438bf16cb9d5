/// Application context and dependency injection
use crate::{
    account::{AccountStore, SessionManager},
    auth::TokenIssuer,
    config::ServerConfig,
    db,
    error::AppResult,
    upload::{CloudinaryUploader, ImageUploader},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub account_db: SqlitePool,
    pub accounts: AccountStore,
    pub tokens: Arc<TokenIssuer>,
    pub sessions: Arc<SessionManager>,
    pub uploader: Arc<dyn ImageUploader>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AppResult<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.upload.temp_dir).await?;

        let account_db =
            db::create_pool(&config.storage.database_path, db::DatabaseOptions::default())
                .await?;
        db::run_migrations(&account_db).await?;
        db::test_connection(&account_db).await?;

        let uploader: Arc<dyn ImageUploader> = Arc::new(CloudinaryUploader::new(&config.upload)?);

        Ok(Self::with_parts(config, account_db, uploader))
    }

    /// Wire the services around an existing pool and uploader
    pub fn with_parts(
        config: ServerConfig,
        account_db: SqlitePool,
        uploader: Arc<dyn ImageUploader>,
    ) -> Self {
        let accounts = AccountStore::new(account_db.clone());
        let tokens = Arc::new(TokenIssuer::new(&config.authentication));
        let sessions = Arc::new(SessionManager::new(
            accounts.clone(),
            tokens.clone(),
            uploader.clone(),
        ));

        Self {
            config: Arc::new(config),
            account_db,
            accounts,
            tokens,
            sessions,
            uploader,
        }
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
