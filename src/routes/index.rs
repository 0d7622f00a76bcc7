use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::instrument;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub users: i64,
}

/// Routes mounted under `/api/v1`.
pub fn index_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/unauthorized", get(unauthorized))
}

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse { status: "OK" })
}

#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let users = state.db.count_users().await.map_err(ApiError::internal)?;
    Ok(Json(StatsResponse { users }))
}

pub async fn unauthorized() -> ApiError {
    ApiError::Unauthorized
}
