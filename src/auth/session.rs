//! Session tokens, cookies, and the local admin login.
//!
//! # Purpose
//! Issues and verifies the short-lived HS256 session JWT carried in the
//! `argocd.token` cookie (or the `token` header), builds the cookie strings,
//! and generates OIDC `state` values.
//!
//! # Key invariants
//! - The signing key is 32 bytes from the OS CSPRNG unless `DEX_JWTKEY`
//!   supplies one; restarting with a random key invalidates every session.
//! - Verification never accepts another algorithm than HS256 and applies no
//!   expiry leeway.
use crate::config::{AdminLoginConfig, DexConfig};
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SESSION_COOKIE: &str = "argocd.token";
pub const TOKEN_HEADER: &str = "token";
pub const STATE_COOKIE: &str = "oauthstate";
const STATE_COOKIE_TTL_SECS: i64 = 600;

/// Claims of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("TOKEN EXPIRED")]
    Expired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("malformed token")]
    Malformed,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("session service timed out")]
    Timeout,
}

/// Issues and verifies session tokens.
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwt_ttl_secs: i64,
    cookie_ttl_secs: i64,
    admin: AdminLoginConfig,
}

impl SessionManager {
    /// Build from configuration, drawing a random key when `DEX_JWTKEY` is unset.
    pub fn new(dex: &DexConfig, admin: AdminLoginConfig) -> Self {
        let key = if dex.jwt_key.is_empty() {
            let mut key = [0u8; 32];
            OsRng.fill_bytes(&mut key);
            key.to_vec()
        } else {
            dex.jwt_key.as_bytes().to_vec()
        };
        Self::with_key(
            &key,
            dex.jwt_expiration_secs,
            dex.cookie_expiration_secs,
            admin,
        )
    }

    pub fn with_key(
        key: &[u8],
        jwt_ttl_secs: i64,
        cookie_ttl_secs: i64,
        admin: AdminLoginConfig,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            jwt_ttl_secs,
            cookie_ttl_secs,
            admin,
        }
    }

    /// Sign a token for `email` valid for the configured JWT lifetime.
    pub fn issue(
        &self,
        email: &str,
        email_verified: bool,
        groups: Vec<String>,
        roles: Vec<String>,
    ) -> Result<String, SessionError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            email: email.to_string(),
            email_verified,
            groups,
            token: String::new(),
            roles,
            iat: now,
            exp: now + self.jwt_ttl_secs,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(|err| {
            tracing::error!(error = %err, "session token signing failed");
            SessionError::Malformed
        })
    }

    /// Verify signature and expiry.
    ///
    /// # Errors
    /// - `Expired` when the signature is valid but `exp` has passed.
    /// - `InvalidSignature` when the token was not signed with this key.
    /// - `Malformed` for anything that does not decode.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    SessionError::InvalidSignature
                }
                _ => SessionError::Malformed,
            })
    }

    /// Re-sign `claims` with fresh roles and the expiry rolled forward.
    pub fn refresh(
        &self,
        claims: &SessionClaims,
        roles: Vec<String>,
    ) -> Result<String, SessionError> {
        let now = Utc::now().timestamp();
        self.sign(&SessionClaims {
            roles,
            iat: now,
            exp: now + self.jwt_ttl_secs,
            ..claims.clone()
        })
    }

    /// Local admin login with the `ACD_USERNAME` / `ACD_PASSWORD` pair.
    ///
    /// # Errors
    /// - `InvalidCredentials` on mismatch or when no password is configured.
    pub fn login_local(&self, username: &str, password: &str) -> Result<String, SessionError> {
        let Some(expected) = self.admin.password.as_deref() else {
            return Err(SessionError::InvalidCredentials);
        };
        let user_ok = constant_time_eq(username.as_bytes(), self.admin.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), expected.as_bytes());
        if !(user_ok && pass_ok) {
            return Err(SessionError::InvalidCredentials);
        }
        self.issue(&self.admin.username, true, Vec::new(), Vec::new())
    }

    pub fn admin_username(&self) -> &str {
        &self.admin.username
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; Max-Age={}",
            self.cookie_ttl_secs
        )
    }
}

/// `Set-Cookie` value that deletes the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=-1")
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn new_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `Set-Cookie` value carrying the OIDC `state` across the authorize redirect.
pub fn state_cookie(state: &str) -> String {
    format!("{STATE_COOKIE}={state}; Path=/; HttpOnly; Max-Age={STATE_COOKIE_TTL_SECS}")
}

pub fn clear_state_cookie() -> String {
    format!("{STATE_COOKIE}=; Path=/; HttpOnly; Max-Age=-1")
}

/// Non-empty value of the cookie `name`, if present.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Session token from the `argocd.token` cookie, else the `token` header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE).or_else(|| {
        headers
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// Byte comparison whose running time does not depend on where inputs differ.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
