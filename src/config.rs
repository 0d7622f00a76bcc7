use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub reset_db_on_start: bool,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://a.db".into());
        let session = SessionConfig {
            cookie_name: std::env::var("SESSION_COOKIE_NAME")
                .unwrap_or_else(|_| "session_id".into()),
            cookie_secure: env_flag("SESSION_COOKIE_SECURE"),
        };
        let cfg = Self {
            database_url,
            reset_db_on_start: env_flag("DB_RESET_ON_START"),
            session,
        };
        anyhow::ensure!(
            !cfg.session.cookie_name.trim().is_empty(),
            "SESSION_COOKIE_NAME must not be empty"
        );
        Ok(cfg)
    }

    /// Config used by tests: in-memory database, default cookie.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            reset_db_on_start: false,
            session: SessionConfig {
                cookie_name: "session_id".into(),
                cookie_secure: false,
            },
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::parse_flag;

    #[test]
    fn flags_accept_common_truthy_values() {
        for v in ["1", "true", "TRUE", " yes ", "on"] {
            assert!(parse_flag(v), "{v:?} should be true");
        }
        for v in ["", "0", "false", "off", "nope"] {
            assert!(!parse_flag(v), "{v:?} should be false");
        }
    }
}
