//! Helpers for driving the router in unit tests.

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderMap, Method, Request, StatusCode,
    },
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use tower_http::normalize_path::NormalizePath;

use crate::{app::build_service, state::AppState};

pub struct TestApp {
    pub state: AppState,
    service: NormalizePath<Router>,
}

impl TestApp {
    pub async fn new() -> Self {
        let state = AppState::fake().await;
        let service = build_service(state.clone());
        Self { state, service }
    }

    pub async fn register(&self, email: &str, password: &str) {
        self.state
            .auth
            .register_user(email, password)
            .await
            .expect("register test user");
    }
}

pub fn form_request(method: Method, uri: &str, body: &str, session_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(sid) = session_id {
        builder = builder.header(COOKIE, format!("session_id={sid}"));
    }
    builder.body(Body::from(body.to_string())).expect("valid request")
}

/// Request with an arbitrary (or no) `Content-Type`.
pub fn raw_request(method: Method, uri: &str, body: &str, content_type: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header(CONTENT_TYPE, ct);
    }
    builder.body(Body::from(body.to_string())).expect("valid request")
}

pub async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let res = app
        .service
        .clone()
        .oneshot(req)
        .await
        .expect("infallible service");
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}

/// Value of cookie `name` from the response's `Set-Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
}
