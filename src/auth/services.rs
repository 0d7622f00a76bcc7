use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::password::{hash_password, verify_password};
use crate::db::{Db, DbError, User, UserChange, UserFilter};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User {0} already exists")]
    EmailTaken(String),
    #[error("email and password are required")]
    MissingCredentials,
    #[error("invalid email")]
    InvalidEmail,
    #[error("no user registered with that email")]
    UnknownEmail,
    #[error("invalid reset token")]
    InvalidResetToken,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Fresh random token used for session ids and reset tokens.
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Registration, sessions and password resets on top of the user store.
#[derive(Clone)]
pub struct Auth {
    db: Db,
}

impl Auth {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn register_user(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        match self.db.find_user_by(&UserFilter::email(&email)).await {
            Ok(_) => return Err(AuthError::EmailTaken(email)),
            Err(DbError::NoResultFound) => {}
            Err(e) => return Err(e.into()),
        }

        let hashed = hash_password(password)?;
        match self.db.add_user(&email, &hashed).await {
            Ok(user) => {
                info!(user_id = user.id, email = %user.email, "user registered");
                Ok(user)
            }
            Err(DbError::AlreadyExists) => Err(AuthError::EmailTaken(email)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn valid_login(&self, email: &str, password: &str) -> Result<bool, AuthError> {
        let email = normalize_email(email);
        let user = match self.db.find_user_by(&UserFilter::email(&email)).await {
            Ok(user) => user,
            Err(DbError::NoResultFound) => {
                warn!(email = %email, "login unknown email");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let ok = verify_password(password, &user.hashed_password)?;
        if !ok {
            warn!(user_id = user.id, "login invalid password");
        }
        Ok(ok)
    }

    /// Issue a session id for `email`; `None` when no such user exists.
    pub async fn create_session(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        let user = match self.db.find_user_by(&UserFilter::email(&email)).await {
            Ok(user) => user,
            Err(DbError::NoResultFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session_id = generate_uuid();
        self.db
            .update_user(user.id, vec![UserChange::SessionId(Some(session_id.clone()))])
            .await?;
        info!(user_id = user.id, "session created");
        Ok(Some(session_id))
    }

    pub async fn get_user_from_session_id(
        &self,
        session_id: Option<&str>,
    ) -> Result<Option<User>, AuthError> {
        let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        match self.db.find_user_by(&UserFilter::session_id(session_id)).await {
            Ok(user) => Ok(Some(user)),
            Err(DbError::NoResultFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn destroy_session(&self, user_id: i64) -> Result<(), AuthError> {
        match self
            .db
            .update_user(user_id, vec![UserChange::SessionId(None)])
            .await
        {
            Ok(()) => {
                info!(user_id, "session destroyed");
                Ok(())
            }
            Err(DbError::NoResultFound) => {
                debug!(user_id, "destroy_session on unknown user");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_reset_password_token(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let user = match self.db.find_user_by(&UserFilter::email(&email)).await {
            Ok(user) => user,
            Err(DbError::NoResultFound) => return Err(AuthError::UnknownEmail),
            Err(e) => return Err(e.into()),
        };

        let token = generate_uuid();
        self.db
            .update_user(user.id, vec![UserChange::ResetToken(Some(token.clone()))])
            .await?;
        info!(user_id = user.id, "reset token issued");
        Ok(token)
    }

    /// Set a new password for the holder of `reset_token` and consume the token.
    pub async fn update_password(&self, reset_token: &str, password: &str) -> Result<(), AuthError> {
        if reset_token.is_empty() {
            return Err(AuthError::InvalidResetToken);
        }
        let user = match self
            .db
            .find_user_by(&UserFilter::reset_token(reset_token))
            .await
        {
            Ok(user) => user,
            Err(DbError::NoResultFound) => return Err(AuthError::InvalidResetToken),
            Err(e) => return Err(e.into()),
        };
        if password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let hashed = hash_password(password)?;
        self.db
            .update_user(
                user.id,
                vec![
                    UserChange::HashedPassword(hashed),
                    UserChange::ResetToken(None),
                ],
            )
            .await?;
        info!(user_id = user.id, "password updated");
        Ok(())
    }
}
