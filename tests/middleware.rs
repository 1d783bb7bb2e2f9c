mod common;

use axum::body::Body;
use axum::http::header::SET_COOKIE;
use axum::http::{Request, StatusCode};
use common::{empty_request, json_request, read_json, test_app, test_app_with};
use orchestrator_auth::auth::middleware::authorize;
use orchestrator_auth::config::AuthConfig;
use orchestrator_auth::store::UserRepo;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn whitelisted_paths_skip_authentication() {
    let app = test_app().await;
    for path in ["/", "/health", "/self-register/check", "/openapi.json"] {
        let response = app.send(empty_request("GET", path, None)).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
    }
    let payload = read_json(app.send(empty_request("GET", "/health", None)).await).await;
    assert_eq!(payload["result"]["backend"], "memory");
}

#[tokio::test]
async fn missing_and_invalid_tokens_are_rejected() {
    let app = test_app().await;
    let response = app.send(empty_request("GET", "/user", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json(response).await;
    assert_eq!(payload["code"], 401);
    assert_eq!(payload["errors"][0]["userMessage"], "UN-AUTHENTICATED");

    let response = app
        .send(empty_request("GET", "/user", Some("garbage")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cookie = response.headers()[SET_COOKIE].to_str().expect("cookie").to_string();
    assert!(cookie.starts_with("argocd.token=;"));
    assert_eq!(
        read_json(response).await["errors"][0]["userMessage"],
        "Unauthorized"
    );
}

#[tokio::test]
async fn the_session_cookie_is_accepted() {
    let app = test_app().await;
    let token = app.admin_token();
    let request = Request::builder()
        .uri("/user/check/roles")
        .header("cookie", format!("theme=dark; argocd.token={token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tokens_of_unknown_or_deleted_users_fail() {
    let app = test_app().await;
    let admin = app.admin_token();
    let ghost = app.token_for("ghost@example.com");
    let response = app.send(empty_request("GET", "/user", Some(&ghost))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({"email_id": "gone@example.com"}),
        ))
        .await;
    let id = read_json(response).await["result"][0]["id"]
        .as_i64()
        .expect("id");
    let gone = app.token_for("gone@example.com");
    let response = app
        .send(empty_request("GET", "/user/check/roles", Some(&gone)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    app.send(empty_request("DELETE", &format!("/user/{id}"), Some(&admin)))
        .await;
    let response = app
        .send(empty_request("GET", "/user/check/roles", Some(&gone)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verified_requests_record_a_login_audit() {
    let app = test_app().await;
    let admin = app.admin_token();
    let request = Request::builder()
        .uri("/user/check/roles")
        .header("token", &admin)
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::empty())
        .expect("request");
    app.send(request).await;

    let audit = app
        .state
        .store
        .get_user_audit(orchestrator_auth::service::ADMIN_USER_ID)
        .await
        .expect("audit")
        .expect("row");
    assert_eq!(audit.client_ip, "203.0.113.7");
}

fn webhook_router(app: &common::TestApp) -> axum::Router {
    axum::Router::new()
        .route("/webhook/ci", axum::routing::post(|| async { "accepted" }))
        .layer(axum::middleware::from_fn_with_state(
            app.state.clone(),
            authorize,
        ))
        .with_state(app.state.clone())
}

fn hook(key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/webhook/ci");
    if let Some(key) = key {
        builder = builder.header("api-key", key);
    }
    builder.body(Body::empty()).expect("request")
}

#[tokio::test]
async fn webhook_paths_need_the_api_key() {
    let mut config = AuthConfig::for_tests();
    config.webhook_token = Some("hook-secret".to_string());
    let app = test_app_with(config).await;
    let router = webhook_router(&app);

    let response = router.clone().oneshot(hook(None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = router
        .clone()
        .oneshot(hook(Some("wrong")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    for near_miss in ["hook-secreT", "hook-secret ", "hook-secre"] {
        let response = router
            .clone()
            .oneshot(hook(Some(near_miss)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{near_miss:?}");
    }
    let response = router
        .oneshot(hook(Some("hook-secret")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhooks_stay_closed_without_a_configured_token() {
    let app = test_app().await;
    let response = webhook_router(&app)
        .oneshot(hook(Some("")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
