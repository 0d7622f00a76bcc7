use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, QueryBuilder, Sqlite, SqlitePool,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const USER_COLUMNS: &str = "id, email, hashed_password, session_id, reset_token, created_at";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("no user matches the given filter")]
    NoResultFound,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("value already exists")]
    AlreadyExists,
    #[error("database error: {0}")]
    Sqlx(#[source] sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::AlreadyExists,
            _ => Self::Sqlx(err),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub hashed_password: String,    // PHC string, never sent to clients
    pub session_id: Option<String>, // set while logged in
    pub reset_token: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Conjunctive lookup on `users`. Unset fields are ignored.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub session_id: Option<String>,
    pub reset_token: Option<String>,
}

impl UserFilter {
    pub fn id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn reset_token(reset_token: impl Into<String>) -> Self {
        Self {
            reset_token: Some(reset_token.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.email.is_none()
            && self.hashed_password.is_none()
            && self.session_id.is_none()
            && self.reset_token.is_none()
    }
}

/// A single column assignment for `Db::update_user`.
#[derive(Debug, Clone)]
pub enum UserChange {
    Email(String),
    HashedPassword(String),
    SessionId(Option<String>),
    ResetToken(Option<String>),
}

#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open the database file named by `DATABASE_URL` and bring the schema up to date.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("parse DATABASE_URL {}", config.database_url))?
            .create_if_missing(true);

        // One connection: a single local file with a single writer.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("connect to database")?;

        let db = Self { pool };
        if config.reset_db_on_start {
            db.drop_schema().await?;
        }
        db.migrate().await?;
        info!(url = %config.database_url, "database ready");
        Ok(db)
    }

    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::connect(&AppConfig::for_tests()).await
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        MIGRATOR.run(&self.pool).await.context("run migrations")?;
        Ok(())
    }

    async fn drop_schema(&self) -> anyhow::Result<()> {
        warn!("DB_RESET_ON_START is set; dropping users table");
        sqlx::query("DROP TABLE IF EXISTS users")
            .execute(&self.pool)
            .await
            .context("drop users")?;
        sqlx::query("DROP TABLE IF EXISTS _sqlx_migrations")
            .execute(&self.pool)
            .await
            .context("drop migration history")?;
        Ok(())
    }

    pub async fn add_user(&self, email: &str, hashed_password: &str) -> Result<User, DbError> {
        if email.trim().is_empty() || hashed_password.is_empty() {
            return Err(DbError::InvalidInput("email and hashed_password are required"));
        }

        let sql = format!(
            "INSERT INTO users (email, hashed_password, created_at) VALUES (?, ?, ?) RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .bind(hashed_password)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await?;
        debug!(user_id = user.id, created_at = %user.created_at, "user inserted");
        Ok(user)
    }

    /// First user matching every field set in `filter`.
    pub async fn find_user_by(&self, filter: &UserFilter) -> Result<User, DbError> {
        if filter.is_empty() {
            return Err(DbError::InvalidRequest("at least one filter field is required"));
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE "));
        let mut clauses = qb.separated(" AND ");
        if let Some(id) = filter.id {
            clauses.push("id = ").push_bind_unseparated(id);
        }
        if let Some(email) = &filter.email {
            clauses.push("email = ").push_bind_unseparated(email.clone());
        }
        if let Some(hash) = &filter.hashed_password {
            clauses
                .push("hashed_password = ")
                .push_bind_unseparated(hash.clone());
        }
        if let Some(session_id) = &filter.session_id {
            clauses
                .push("session_id = ")
                .push_bind_unseparated(session_id.clone());
        }
        if let Some(token) = &filter.reset_token {
            clauses
                .push("reset_token = ")
                .push_bind_unseparated(token.clone());
        }
        qb.push(" ORDER BY id LIMIT 1");

        qb.build_query_as::<User>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NoResultFound)
    }

    pub async fn update_user(&self, user_id: i64, changes: Vec<UserChange>) -> Result<(), DbError> {
        let user = self.find_user_by(&UserFilter::id(user_id)).await?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        let mut assignments = qb.separated(", ");
        for change in changes {
            match change {
                UserChange::Email(v) => {
                    assignments.push("email = ").push_bind_unseparated(v);
                }
                UserChange::HashedPassword(v) => {
                    assignments.push("hashed_password = ").push_bind_unseparated(v);
                }
                UserChange::SessionId(v) => {
                    assignments.push("session_id = ").push_bind_unseparated(v);
                }
                UserChange::ResetToken(v) => {
                    assignments.push("reset_token = ").push_bind_unseparated(v);
                }
            }
        }
        qb.push(" WHERE id = ").push_bind(user.id);

        qb.build().execute(&self.pool).await?;
        debug!(user_id, "user updated");
        Ok(())
    }

    pub async fn count_users(&self) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> Db {
        Db::in_memory().await.expect("in-memory db")
    }

    #[tokio::test]
    async fn add_and_find_user() {
        let db = db().await;
        let user = db.add_user("test@test.com", "SuperHashedPwd").await.unwrap();
        assert_eq!(user.email, "test@test.com");
        assert!(user.session_id.is_none());
        assert!(user.reset_token.is_none());

        let found = db.find_user_by(&UserFilter::email("test@test.com")).await.unwrap();
        assert_eq!(found.id, user.id);

        let by_id = db.find_user_by(&UserFilter::id(user.id)).await.unwrap();
        assert_eq!(by_id.email, "test@test.com");
    }

    #[tokio::test]
    async fn add_user_requires_email_and_hash() {
        let db = db().await;
        assert!(matches!(
            db.add_user("", "hash").await,
            Err(DbError::InvalidInput(_))
        ));
        assert!(matches!(
            db.add_user("a@b.com", "").await,
            Err(DbError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_by_constraint() {
        let db = db().await;
        db.add_user("dup@test.com", "h1").await.unwrap();
        let err = db.add_user("dup@test.com", "h2").await.unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists), "got {err:?}");
        assert_eq!(db.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_missing_user_is_no_result() {
        let db = db().await;
        let err = db
            .find_user_by(&UserFilter::email("nobody@test.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NoResultFound));
    }

    #[tokio::test]
    async fn empty_filter_is_invalid_request() {
        let db = db().await;
        db.add_user("a@test.com", "h").await.unwrap();
        let err = db.find_user_by(&UserFilter::default()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn filter_fields_are_combined() {
        let db = db().await;
        let user = db.add_user("combo@test.com", "hash-a").await.unwrap();

        let hit = UserFilter {
            email: Some("combo@test.com".into()),
            hashed_password: Some("hash-a".into()),
            ..UserFilter::default()
        };
        assert_eq!(db.find_user_by(&hit).await.unwrap().id, user.id);

        let miss = UserFilter {
            email: Some("combo@test.com".into()),
            hashed_password: Some("hash-b".into()),
            ..UserFilter::default()
        };
        assert!(matches!(
            db.find_user_by(&miss).await,
            Err(DbError::NoResultFound)
        ));
    }

    #[tokio::test]
    async fn update_sets_and_clears_nullable_fields() {
        let db = db().await;
        let user = db.add_user("upd@test.com", "hash").await.unwrap();

        db.update_user(
            user.id,
            vec![
                UserChange::SessionId(Some("sess-1".into())),
                UserChange::ResetToken(Some("reset-1".into())),
            ],
        )
        .await
        .unwrap();

        let found = db.find_user_by(&UserFilter::session_id("sess-1")).await.unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.reset_token.as_deref(), Some("reset-1"));

        db.update_user(user.id, vec![UserChange::SessionId(None)])
            .await
            .unwrap();
        let found = db.find_user_by(&UserFilter::id(user.id)).await.unwrap();
        assert!(found.session_id.is_none());
        assert_eq!(found.reset_token.as_deref(), Some("reset-1"));
    }

    #[tokio::test]
    async fn update_unknown_user_is_no_result() {
        let db = db().await;
        let err = db
            .update_user(42, vec![UserChange::HashedPassword("x".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NoResultFound));
    }

    #[tokio::test]
    async fn update_with_no_changes_is_noop() {
        let db = db().await;
        let user = db.add_user("noop@test.com", "hash").await.unwrap();
        db.update_user(user.id, Vec::new()).await.unwrap();
        let found = db.find_user_by(&UserFilter::id(user.id)).await.unwrap();
        assert_eq!(found.hashed_password, "hash");
    }

    #[tokio::test]
    async fn count_users_tracks_inserts() {
        let db = db().await;
        assert_eq!(db.count_users().await.unwrap(), 0);
        db.add_user("one@test.com", "h").await.unwrap();
        db.add_user("two@test.com", "h").await.unwrap();
        assert_eq!(db.count_users().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_email() {
        let db = db().await;
        let user = db.add_user("old@test.com", "hash").await.unwrap();
        db.update_user(user.id, vec![UserChange::Email("new@test.com".into())])
            .await
            .unwrap();

        let found = db.find_user_by(&UserFilter::email("new@test.com")).await.unwrap();
        assert_eq!(found.id, user.id);
        assert!(matches!(
            db.find_user_by(&UserFilter::email("old@test.com")).await,
            Err(DbError::NoResultFound)
        ));
    }

    #[tokio::test]
    async fn update_email_to_taken_address_is_rejected() {
        let db = db().await;
        db.add_user("first@test.com", "h1").await.unwrap();
        let second = db.add_user("second@test.com", "h2").await.unwrap();

        let err = db
            .update_user(second.id, vec![UserChange::Email("first@test.com".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists), "got {err:?}");

        let unchanged = db.find_user_by(&UserFilter::id(second.id)).await.unwrap();
        assert_eq!(unchanged.email, "second@test.com");
    }

    #[tokio::test]
    async fn reset_on_start_wipes_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig {
            database_url: format!("sqlite://{}", dir.path().join("users.db").display()),
            ..AppConfig::for_tests()
        };

        let db = Db::connect(&config).await.unwrap();
        db.add_user("keep@test.com", "hash").await.unwrap();
        db.pool.close().await;

        let reopened = Db::connect(&config).await.unwrap();
        assert_eq!(reopened.count_users().await.unwrap(), 1);
        reopened.pool.close().await;

        config.reset_db_on_start = true;
        let wiped = Db::connect(&config).await.unwrap();
        assert_eq!(wiped.count_users().await.unwrap(), 0);
        wiped.add_user("keep@test.com", "hash").await.unwrap();
        assert_eq!(wiped.count_users().await.unwrap(), 1);
    }
}
