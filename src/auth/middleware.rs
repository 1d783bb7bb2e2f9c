//! Request authentication middleware.
//!
//! # Purpose
//! Runs in front of every route. Whitelisted paths pass through (webhook
//! paths additionally need a matching `api-key`); everything else needs a
//! session token that verifies and names an active user. The resolved caller
//! is injected as an [`ActingUser`] extension for the handlers.
//!
//! # Failure contract
//! - no token: 401 `UN-AUTHENTICATED`
//! - token does not verify or names no active user: 401 `Unauthorized`, and
//!   the session cookie is cleared
//! - webhook `api-key` mismatch: 401 `UN-AUTHENTICATED`
use crate::api::error::{ApiError, api_unauthenticated, api_unauthorized};
use crate::app::AppState;
use crate::auth::session::{clear_session_cookie, constant_time_eq, token_from_headers};
use crate::model::UserType;
use crate::service::{ActingUser, is_super_admin};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

const WEBHOOK_KEY_HEADER: &str = "api-key";

const WHITELIST_EXACT: &[&str] = &[
    "/",
    "/health",
    "/login",
    "/auth/login",
    "/auth/callback",
    "/refresh",
    "/api/v1/session",
    "/register",
    "/self-register/check",
    "/openapi.json",
];

const WHITELIST_PREFIX: &[&str] = &["/api/dex/", "/docs", "/dashboard", "/k8s/proxy/"];

const WEBHOOK_PREFIX: &str = "/webhook/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whitelist {
    Open,
    Webhook,
}

/// How `path` bypasses authentication, if it does.
pub fn whitelist_rule(path: &str) -> Option<Whitelist> {
    if path.starts_with(WEBHOOK_PREFIX) {
        return Some(Whitelist::Webhook);
    }
    if WHITELIST_EXACT.contains(&path) || WHITELIST_PREFIX.iter().any(|p| path.starts_with(p)) {
        return Some(Whitelist::Open);
    }
    None
}

/// First `X-Forwarded-For` hop, else the peer address, else empty.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

fn invalid_token(reason: &str) -> Response {
    api_unauthorized(reason)
        .with_cookie(clear_session_cookie())
        .into_response()
}

pub async fn authorize(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();

    // Step 1: whitelisted paths.
    match whitelist_rule(&path) {
        Some(Whitelist::Open) => return next.run(request).await,
        Some(Whitelist::Webhook) => {
            let presented = request
                .headers()
                .get(WEBHOOK_KEY_HEADER)
                .and_then(|value| value.to_str().ok());
            let allowed = matches!(
                (presented, state.config.webhook_token.as_deref()),
                (Some(key), Some(expected))
                    if !expected.is_empty() && constant_time_eq(key.as_bytes(), expected.as_bytes())
            );
            if !allowed {
                tracing::debug!(path = %path, "webhook api-key rejected");
                return api_unauthenticated().into_response();
            }
            return next.run(request).await;
        }
        None => {}
    }

    // Step 2: token verification.
    let Some(token) = token_from_headers(request.headers()) else {
        return api_unauthenticated().into_response();
    };
    let claims = match state.sessions.verify(&token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(error = %err, path = %path, "session token rejected");
            return invalid_token(&err.to_string());
        }
    };

    // Step 3: the token must name an active user; API tokens must be current.
    let user = match state.users.user_by_email(&claims.email).await {
        Ok(Some(user)) => user,
        Ok(None) => return invalid_token("unknown user"),
        Err(err) => return ApiError::from(err).into_response(),
    };
    if user.user_type == UserType::ApiToken && user.access_token.as_deref() != Some(token.as_str())
    {
        return invalid_token("api token revoked");
    }

    // Step 4: audit and hand the caller to the handlers.
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);
    state.users.save_login_audit(user.id, &ip).await;
    let super_admin = is_super_admin(state.engine.as_ref(), &user.email).await;
    request.extensions_mut().insert(ActingUser {
        id: user.id,
        email: user.email,
        super_admin,
    });
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn whitelist_distinguishes_exact_prefix_and_webhook() {
        assert_eq!(whitelist_rule("/auth/callback"), Some(Whitelist::Open));
        assert_eq!(whitelist_rule("/api/dex/keys"), Some(Whitelist::Open));
        assert_eq!(whitelist_rule("/docs/index.html"), Some(Whitelist::Open));
        assert_eq!(whitelist_rule("/webhook/ci"), Some(Whitelist::Webhook));
        assert_eq!(whitelist_rule("/user"), None);
        assert_eq!(whitelist_rule("/refresh/x"), None);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.9:4000".parse().expect("addr");
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.9");
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(client_ip(&HeaderMap::new(), None), "");
    }
}
