use crate::auth::Auth;
use crate::config::AppConfig;
use crate::db::Db;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub auth: Auth,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let db = Db::connect(&config).await?;
        Ok(Self::from_parts(db, Arc::new(config)))
    }

    pub fn from_parts(db: Db, config: Arc<AppConfig>) -> Self {
        Self {
            auth: Auth::new(db.clone()),
            db,
            config,
        }
    }

    /// State over a private in-memory database.
    #[cfg(test)]
    pub async fn fake() -> Self {
        let db = Db::in_memory().await.expect("in-memory db");
        Self::from_parts(db, Arc::new(AppConfig::for_tests()))
    }
}
