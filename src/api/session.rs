//! Login, callback, refresh, and self-registration handlers.
//!
//! # Purpose
//! Drives the browser login: `/login` redirects to the OIDC provider with a
//! random `state` kept in a cookie, `/auth/callback` exchanges the code,
//! ensures the user row (self-registering when enabled), and issues the
//! session cookie. `/refresh` rolls an unexpired session forward with fresh
//! roles; `/api/v1/session` is the local admin login.
//!
//! # Security considerations
//! - The callback rejects a `state` that does not match the cookie.
//! - An expired session on refresh clears the cookie and answers 401.
use crate::api::error::{
    ApiError, Envelope, api_bad_request, api_internal, api_not_found, api_unauthenticated,
    api_unauthorized, ok,
};
use crate::api::types::{CallbackQuery, LoginRequest, SelfRegisterCheck, TokenResponse};
use crate::app::AppState;
use crate::auth::oidc::OidcError;
use crate::auth::session::{
    STATE_COOKIE, SessionError, clear_session_cookie, clear_state_cookie, cookie_value,
    new_state, state_cookie, token_from_headers,
};
use crate::model::UserInfo;
use crate::service::ActingUser;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::{Extension, Json};

const POST_LOGIN_REDIRECT: &str = "/dashboard";

impl From<OidcError> for ApiError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::NotConfigured => api_not_found("sso is not configured"),
            OidcError::Http(_) => api_internal("identity provider unreachable", &err),
            other => api_unauthorized(&other.to_string()),
        }
    }
}

#[utoipa::path(
    get,
    path = "/login",
    tag = "session",
    responses(
        (status = 303, description = "Redirect to the identity provider"),
        (status = 404, description = "No active SSO config", body = crate::api::types::ErrorBody)
    )
)]
/// Begin the OIDC login.
///
/// # What it does
/// Draws a fresh `state`, stores it in the `oauthstate` cookie, and redirects
/// to the active provider's authorize endpoint.
///
/// # Errors
/// - 404 when no SSO config is active.
pub(crate) async fn login(State(state): State<AppState>) -> Result<Response, ApiError> {
    let client = state.oidc.current().await?;
    let oauth_state = new_state();
    let url = client.authorize_url(&oauth_state).await?;
    Ok((
        AppendHeaders([(SET_COOKIE, state_cookie(&oauth_state))]),
        Redirect::to(&url),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/auth/callback",
    tag = "session",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Session issued, redirect to the dashboard"),
        (status = 400, description = "Missing code or state", body = crate::api::types::ErrorBody),
        (status = 401, description = "State mismatch, bad token, or unknown user", body = crate::api::types::ErrorBody)
    )
)]
/// Finish the OIDC login.
///
/// # What it does
/// Checks `state` against the cookie, exchanges the code for a verified
/// identity, makes sure an active user exists, and sets the session cookie.
///
/// # Errors
/// - 400 for a missing `code` or `state`.
/// - 401 for a provider error, a state mismatch, or an unknown user while
///   self-registration is disabled.
pub(crate) async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    if let Some(error) = query.error.as_deref() {
        return Err(api_unauthorized(&format!("identity provider error: {error}")));
    }
    let (Some(code), Some(returned_state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return Err(api_bad_request("code and state are required"));
    };
    // Step 1: the state must round-trip through the cookie.
    if cookie_value(&headers, STATE_COOKIE).as_deref() != Some(returned_state) {
        return Err(api_unauthorized("oauth state mismatch"));
    }

    // Step 2: exchange the code.
    let identity = state.oidc.current().await?.exchange_code(code).await?;
    if identity.email.is_empty() {
        return Err(api_unauthorized("identity has no email"));
    }

    // Step 3: ensure the user.
    if state.users.user_by_email(&identity.email).await?.is_none() {
        if !state.sso.self_registration_enabled().await? {
            tracing::info!(email = %identity.email, "login rejected: unknown user");
            return Err(api_unauthorized("user is not registered"));
        }
        state.users.self_register(&identity.email).await?;
    }

    // Step 4: issue the session.
    let roles = state.users.check_user_roles(&identity.email).await?.roles;
    let token = state
        .sessions
        .issue(&identity.email, identity.email_verified, identity.groups, roles)?;
    tracing::info!(email = %identity.email, "session issued");
    Ok((
        AppendHeaders([
            (SET_COOKIE, state.sessions.session_cookie(&token)),
            (SET_COOKIE, clear_state_cookie()),
        ]),
        Redirect::to(POST_LOGIN_REDIRECT),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/refresh",
    tag = "session",
    responses(
        (status = 200, description = "New session token", body = TokenResponse),
        (status = 400, description = "Malformed token", body = crate::api::types::ErrorBody),
        (status = 401, description = "Expired or invalid token", body = crate::api::types::ErrorBody)
    )
)]
/// Roll the session forward.
///
/// # What it does
/// Verifies the current token, re-reads the caller's roles, and signs a new
/// token with the expiry moved forward.
///
/// # Errors
/// - 401 `TOKEN EXPIRED` (cookie cleared) for an expired token.
/// - 401 for a bad signature or unknown user; 400 for a malformed token.
pub(crate) async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = token_from_headers(&headers).ok_or_else(api_unauthenticated)?;
    let claims = match state.sessions.verify(&token) {
        Ok(claims) => claims,
        Err(SessionError::Expired) => {
            return Err(ApiError::from(SessionError::Expired).with_cookie(clear_session_cookie()));
        }
        Err(err) => return Err(err.into()),
    };
    let roles = state.users.check_user_roles(&claims.email).await?.roles;
    let token = state.sessions.refresh(&claims, roles)?;
    Ok((
        AppendHeaders([(SET_COOKIE, state.sessions.session_cookie(&token))]),
        ok(TokenResponse { token }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/session",
    tag = "session",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session token", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::api::types::ErrorBody)
    )
)]
/// Local admin login with username and password.
///
/// # Errors
/// - 401 for wrong credentials or when no admin password is configured.
pub(crate) async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let token = state.sessions.login_local(&body.username, &body.password)?;
    tracing::info!(username = %body.username, "local session created");
    Ok((
        AppendHeaders([(SET_COOKIE, state.sessions.session_cookie(&token))]),
        ok(TokenResponse { token }),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/devtron/auth/verify",
    tag = "session",
    responses(
        (status = 200, description = "Token is valid", body = bool),
        (status = 401, description = "Token missing or invalid", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn verify(Extension(actor): Extension<ActingUser>) -> Json<Envelope<bool>> {
    tracing::debug!(email = %actor.email, "token verified");
    ok(true)
}

#[utoipa::path(
    post,
    path = "/register",
    tag = "session",
    responses(
        (status = 200, description = "User registered", body = UserInfo),
        (status = 401, description = "Token missing or invalid", body = crate::api::types::ErrorBody),
        (status = 403, description = "Self-registration disabled", body = crate::api::types::ErrorBody)
    )
)]
/// Self-register the user named by a verified session token.
///
/// # What it does
/// Creates (or revives) the token's user with the self-registration roles.
/// Re-registering an active user returns it unchanged.
///
/// # Errors
/// - 401 for a missing or invalid token.
/// - 403 when self-registration is disabled.
pub(crate) async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<UserInfo>>, ApiError> {
    let token = token_from_headers(&headers).ok_or_else(api_unauthenticated)?;
    let claims = state.sessions.verify(&token)?;
    let user = state.users.self_register(&claims.email).await?;
    Ok(ok(user))
}

#[utoipa::path(
    get,
    path = "/self-register/check",
    tag = "session",
    responses(
        (status = 200, description = "Whether self-registration is enabled", body = SelfRegisterCheck)
    )
)]
pub(crate) async fn self_register_check(
    State(state): State<AppState>,
) -> Result<Json<Envelope<SelfRegisterCheck>>, ApiError> {
    let enabled = state.sso.self_registration_enabled().await?;
    Ok(ok(SelfRegisterCheck { enabled }))
}
