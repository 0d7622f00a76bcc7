use axum::{
    extract::{rejection::FormRejection, State},
    http::{header::SET_COOKIE, HeaderMap},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            CredentialsForm, MessageResponse, ProfileResponse, ResetTokenForm, ResetTokenResponse,
            UpdatePasswordForm, UserMessageResponse,
        },
        extractors::{clear_session_cookie, session_cookie, SessionUser},
        services::{normalize_email, AuthError},
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(welcome))
        .route("/users", post(register_user))
        .route("/sessions", post(login).delete(logout))
        .route(
            "/reset_password",
            post(get_reset_password_token).put(update_password),
        )
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/profile", get(profile))
}

/// Body fields of a form request; a body that is not form-encoded has none.
fn form_fields<T: Default>(form: Result<Form<T>, FormRejection>) -> T {
    match form {
        Ok(Form(fields)) => fields,
        Err(rejection) => {
            warn!(error = %rejection, "unreadable form body");
            T::default()
        }
    }
}

pub async fn welcome() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Bienvenue",
    })
}

#[instrument(skip(state, form))]
pub async fn register_user(
    State(state): State<AppState>,
    form: Result<Form<CredentialsForm>, FormRejection>,
) -> Result<Json<UserMessageResponse>, ApiError> {
    let form = form_fields(form);
    let email = form.email.unwrap_or_default();
    let password = form.password.unwrap_or_default();

    let user = state.auth.register_user(&email, &password).await?;
    Ok(Json(UserMessageResponse {
        email: user.email,
        message: "user created",
    }))
}

#[instrument(skip(state, form))]
pub async fn login(
    State(state): State<AppState>,
    form: Result<Form<CredentialsForm>, FormRejection>,
) -> Result<(HeaderMap, Json<UserMessageResponse>), ApiError> {
    let form = form_fields(form);
    let (Some(email), Some(password)) = (form.email, form.password) else {
        warn!("login without credentials");
        return Err(ApiError::Unauthorized);
    };

    if !state.auth.valid_login(&email, &password).await? {
        return Err(ApiError::Unauthorized);
    }
    let Some(session_id) = state.auth.create_session(&email).await? else {
        return Err(ApiError::Unauthorized);
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        session_cookie(&state.config.session, &session_id).map_err(ApiError::internal)?,
    );

    let email = normalize_email(&email);
    info!(email = %email, "user logged in");
    Ok((
        headers,
        Json(UserMessageResponse {
            email,
            message: "logged in",
        }),
    ))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    SessionUser(user): SessionUser,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    state.auth.destroy_session(user.id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        clear_session_cookie(&state.config.session).map_err(ApiError::internal)?,
    );
    Ok((headers, Json(json!({}))))
}

#[instrument(skip_all)]
pub async fn profile(SessionUser(user): SessionUser) -> Json<ProfileResponse> {
    Json(ProfileResponse { email: user.email })
}

#[instrument(skip(state, form))]
pub async fn get_reset_password_token(
    State(state): State<AppState>,
    form: Result<Form<ResetTokenForm>, FormRejection>,
) -> Result<Json<ResetTokenResponse>, ApiError> {
    let form = form_fields(form);
    let Some(email) = form.email else {
        return Err(ApiError::Forbidden);
    };

    let reset_token = state.auth.get_reset_password_token(&email).await?;
    Ok(Json(ResetTokenResponse {
        email: normalize_email(&email),
        reset_token,
    }))
}

#[instrument(skip(state, form))]
pub async fn update_password(
    State(state): State<AppState>,
    form: Result<Form<UpdatePasswordForm>, FormRejection>,
) -> Result<Json<UserMessageResponse>, ApiError> {
    let form = form_fields(form);
    let (Some(reset_token), Some(new_password)) = (form.reset_token, form.new_password) else {
        return Err(ApiError::Forbidden);
    };

    match state.auth.update_password(&reset_token, &new_password).await {
        Ok(()) => {}
        Err(e @ (AuthError::Hash(_) | AuthError::Db(_))) => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "password update refused");
            return Err(ApiError::Forbidden);
        }
    }

    Ok(Json(UserMessageResponse {
        email: form.email.map(|e| normalize_email(&e)).unwrap_or_default(),
        message: "Password updated",
    }))
}
