use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{InvalidHeaderValue, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
};
use tracing::warn;

use crate::{config::SessionConfig, db::User, error::ApiError, state::AppState};

/// Resolves the session cookie to its user; rejects with 403 otherwise.
pub struct SessionUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session_id = read_cookie(&parts.headers, &state.config.session.cookie_name);
        match state
            .auth
            .get_user_from_session_id(session_id.as_deref())
            .await?
        {
            Some(user) => Ok(SessionUser(user)),
            None => {
                warn!(has_cookie = session_id.is_some(), "no user for session cookie");
                Err(ApiError::Forbidden)
            }
        }
    }
}

pub(crate) fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == name {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

pub(crate) fn session_cookie(
    cfg: &SessionConfig,
    session_id: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{}={session_id}; Path=/; HttpOnly; SameSite=Lax", cfg.cookie_name);
    if cfg.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(cfg: &SessionConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", cfg.cookie_name);
    if cfg.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
