use axum::{
    http::{header::ALLOW, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::services::AuthError;

/// Errors surfaced to HTTP clients as JSON bodies.
#[derive(Debug)]
pub enum ApiError {
    /// 400 with a `message` for the client.
    BadRequest(&'static str),
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            Self::Unauthorized => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
            }
            Self::Forbidden => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": "Forbidden" }))).into_response()
            }
            Self::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
            }
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(json!({ "error": "Method not allowed" })),
            )
                .into_response(),
            Self::Internal(err) => {
                error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::EmailTaken(_) => Self::BadRequest("email already registered"),
            AuthError::MissingCredentials => Self::BadRequest("email and password are required"),
            AuthError::InvalidEmail => Self::BadRequest("invalid email"),
            AuthError::UnknownEmail | AuthError::InvalidResetToken => Self::Forbidden,
            AuthError::Hash(_) | AuthError::Db(_) => Self::Internal(anyhow::Error::new(err)),
        }
    }
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Replaces the router's empty 405 body with the JSON error, keeping `Allow`.
pub async fn json_method_not_allowed(res: Response) -> Response {
    if res.status() != StatusCode::METHOD_NOT_ALLOWED {
        return res;
    }
    let mut out = ApiError::MethodNotAllowed.into_response();
    if let Some(allow) = res.headers().get(ALLOW) {
        out.headers_mut().insert(ALLOW, allow.clone());
    }
    out
}
