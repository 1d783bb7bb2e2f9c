mod common;

use async_trait::async_trait;
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::body::Body;
use common::{empty_request, json_request, read_json, test_app, test_app_with};
use orchestrator_auth::auth::oidc::{OidcClient, OidcError, OidcIdentity};
use orchestrator_auth::config::AuthConfig;
use serde_json::json;
use std::sync::Arc;

struct StaticIdentity {
    email: String,
}

#[async_trait]
impl OidcClient for StaticIdentity {
    fn issuer(&self) -> &str {
        "https://idp.example/api/dex"
    }

    async fn authorize_url(&self, state: &str) -> Result<String, OidcError> {
        Ok(format!("https://idp.example/api/dex/auth?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<OidcIdentity, OidcError> {
        if code != "good-code" {
            return Err(OidcError::Exchange("bad code".to_string()));
        }
        Ok(OidcIdentity {
            subject: "sub-1".to_string(),
            email: self.email.clone(),
            email_verified: true,
            groups: Vec::new(),
        })
    }

    async fn verify_id_token(&self, _token: &str) -> Result<OidcIdentity, OidcError> {
        Err(OidcError::MissingKeyId)
    }
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn callback(state: &str, cookie_state: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/auth/callback?code=good-code&state={state}"))
        .header("cookie", format!("oauthstate={cookie_state}"))
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn local_login_issues_a_cookie_and_rejects_bad_passwords() {
    let app = test_app().await;
    let response = app
        .send(json_request(
            "POST",
            "/api/v1/session",
            None,
            json!({"username": "admin", "password": "password"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert!(cookies[0].starts_with("argocd.token="));
    assert!(cookies[0].contains("Max-Age=600"));
    let token = read_json(response).await["result"]["token"]
        .as_str()
        .expect("token")
        .to_string();

    let response = app
        .send(empty_request("GET", "/devtron/auth/verify", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(json_request(
            "POST",
            "/api/v1/session",
            None,
            json!({"username": "admin", "password": "wrong"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_follows_the_expiry_contract() {
    let app = test_app().await;
    let token = app.admin_token();
    let response = app.send(empty_request("GET", "/refresh", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response)[0].starts_with("argocd.token="));

    let response = app
        .send(empty_request("GET", "/refresh", Some("not.a.jwt")))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut config = AuthConfig::for_tests();
    config.dex.jwt_expiration_secs = -60;
    let expired_app = test_app_with(config).await;
    let expired = expired_app.admin_token();
    let response = expired_app
        .send(empty_request("GET", "/refresh", Some(&expired)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&response)[0].contains("Max-Age=-1"));
    let payload = read_json(response).await;
    assert_eq!(payload["errors"][0]["userMessage"], "TOKEN EXPIRED");

    // A token signed by another process key does not verify.
    let response = app.send(empty_request("GET", "/refresh", Some(&expired))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_redirects_and_callback_issues_a_session() {
    let app = test_app().await;
    app.state
        .oidc
        .set_client(Arc::new(StaticIdentity {
            email: "admin".to_string(),
        }))
        .await;

    let response = app.send(empty_request("GET", "/login", None)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()[LOCATION].to_str().expect("location").to_string();
    let state_cookie = set_cookies(&response)
        .into_iter()
        .find(|c| c.starts_with("oauthstate="))
        .expect("state cookie");
    let state = state_cookie
        .trim_start_matches("oauthstate=")
        .split(';')
        .next()
        .expect("state")
        .to_string();
    assert!(location.ends_with(&format!("state={state}")));

    let response = app.send(callback(&state, &state)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[LOCATION], "/dashboard");
    assert!(
        set_cookies(&response)
            .iter()
            .any(|c| c.starts_with("argocd.token="))
    );

    let response = app.send(callback(&state, "other-state")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn callback_self_registers_only_when_enabled() {
    let app = test_app().await;
    let admin = app.admin_token();
    app.state
        .oidc
        .set_client(Arc::new(StaticIdentity {
            email: "bob@example.com".to_string(),
        }))
        .await;

    let response = app.send(callback("s1", "s1")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(empty_request("GET", "/self-register/check", None))
        .await;
    assert_eq!(read_json(response).await["result"]["enabled"], false);

    // Grant a view role to someone first so the role row exists.
    app.send(json_request(
        "POST",
        "/user",
        Some(&admin),
        json!({
            "email_id": "seed@example.com",
            "roleFilters": [common::view_filter("team1", "dev", "app1", "view")]
        }),
    ))
    .await;
    let response = app
        .send(json_request(
            "PUT",
            "/self-register/roles",
            Some(&admin),
            json!({"roles": ["role:view_team1_dev_app1"]}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .send(empty_request("GET", "/self-register/check", None))
        .await;
    assert_eq!(read_json(response).await["result"]["enabled"], true);

    let response = app.send(callback("s2", "s2")).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(
        app.state
            .engine
            .enforce("bob@example.com", "applications", "get", "team1/app1")
            .await
    );
}

#[tokio::test]
async fn register_creates_the_token_user() {
    let app = test_app().await;
    let admin = app.admin_token();
    let token = app.token_for("frank@example.com");

    let response = app.send(empty_request("POST", "/register", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.send(json_request(
        "PUT",
        "/self-register/roles",
        Some(&admin),
        json!({"roles": ["role:super-admin___"]}),
    ))
    .await;
    let response = app.send(empty_request("POST", "/register", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await["result"]["email_id"],
        "frank@example.com"
    );

    let response = app
        .send(empty_request("GET", "/devtron/auth/verify", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_without_sso_is_not_found() {
    let app = test_app().await;
    let response = app.send(empty_request("GET", "/login", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
