#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use orchestrator_auth::app::{AppState, build_router, build_state};
use orchestrator_auth::config::AuthConfig;
use orchestrator_auth::store::memory::InMemoryStore;
use std::sync::Arc;

pub const ADMIN_PASSWORD: &str = "password";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    /// Bearer-style session token for `email`, as the callback would issue it.
    pub fn token_for(&self, email: &str) -> String {
        self.state
            .sessions
            .issue(email, true, Vec::new(), Vec::new())
            .expect("issue token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .sessions
            .login_local("admin", ADMIN_PASSWORD)
            .expect("admin login")
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        use tower::ServiceExt;
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

/// Router over a fresh memory store with startup tasks already run.
pub async fn test_app() -> TestApp {
    test_app_with(AuthConfig::for_tests()).await
}

pub async fn test_app_with(config: AuthConfig) -> TestApp {
    let state = build_state(config, Arc::new(InMemoryStore::new()))
        .await
        .expect("state");
    state.run_startup_tasks().await.expect("startup tasks");
    TestApp {
        router: build_router(state.clone()),
        state,
    }
}

pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("token", token);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("token", token);
    }
    builder.body(Body::empty()).expect("request")
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn view_filter(team: &str, env: &str, app: &str, action: &str) -> serde_json::Value {
    serde_json::json!({
        "entity": "",
        "team": team,
        "environment": env,
        "entityName": app,
        "action": action,
        "accessType": ""
    })
}
