//! Response envelope and API error types.
//!
//! # Purpose
//! Every endpoint answers with `{code, status, result, errors}`. Successful
//! handlers wrap their payload with [`ok`]; failures return [`ApiError`],
//! built from the service taxonomy or the helpers below.
//!
//! # Security considerations
//! - Internal errors are logged server-side and returned with a generic
//!   user message.
use crate::api::types::{ErrorBody, ErrorDetail};
use crate::auth::session::SessionError;
use crate::service::ServiceError;
use axum::Json;
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse, Response};
use serde::Serialize;

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub status: String,
    pub result: T,
}

fn reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or_default().to_string()
}

/// Wrap `result` in a 200 envelope.
pub fn ok<T: Serialize>(result: T) -> Json<Envelope<T>> {
    Json(Envelope {
        code: StatusCode::OK.as_u16(),
        status: reason(StatusCode::OK),
        result,
    })
}

/// Error envelope plus the HTTP status it is sent with.
///
/// # Invariants
/// - `body.code` equals `status`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
    /// `Set-Cookie` value sent with the error, e.g. to drop a dead session.
    pub set_cookie: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, internal: &str, user: &str) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: status.as_u16(),
                status: reason(status),
                errors: vec![ErrorDetail {
                    code: code.to_string(),
                    internal_message: internal.to_string(),
                    user_message: user.to_string(),
                }],
            },
            set_cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: String) -> Self {
        self.set_cookie = Some(cookie);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.set_cookie {
            Some(cookie) => (
                self.status,
                AppendHeaders([(SET_COOKIE, cookie)]),
                Json(self.body),
            )
                .into_response(),
            None => (self.status, Json(self.body)).into_response(),
        }
    }
}

pub fn api_bad_request(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "bad_request", message, message)
}

/// 401 for a request without credentials.
pub fn api_unauthenticated() -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "unauthenticated",
        "no token provided",
        "UN-AUTHENTICATED",
    )
}

/// 401 for credentials that did not verify.
pub fn api_unauthorized(message: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message, "Unauthorized")
}

pub fn api_forbidden(message: &str) -> ApiError {
    ApiError::new(StatusCode::FORBIDDEN, "forbidden", message, "FORBIDDEN")
}

pub fn api_not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message, message)
}

pub fn api_conflict(message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "conflict", message, message)
}

/// 500 with `err` logged and a generic user message.
pub fn api_internal(message: &str, err: &dyn std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "{message}");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        message,
        "internal server error",
    )
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::BadRequest(message) => api_bad_request(&message),
            ServiceError::Unauthorized(message) => api_unauthorized(&message),
            ServiceError::Forbidden(message) => api_forbidden(&message),
            ServiceError::NotFound(message) => api_not_found(&message),
            ServiceError::Conflict(message) => api_conflict(&message),
            ServiceError::Internal(err) => api_internal("request failed", &err),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Malformed => api_bad_request(&err.to_string()),
            SessionError::Expired => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "token_expired",
                "session expired",
                "TOKEN EXPIRED",
            ),
            SessionError::InvalidSignature | SessionError::InvalidCredentials => {
                api_unauthorized(&err.to_string())
            }
            SessionError::Timeout => api_internal("session login failed", &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                ServiceError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.body.code, status.as_u16());
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let api = ApiError::from(ServiceError::Internal(anyhow::anyhow!("db password=x")));
        assert_eq!(api.body.errors[0].user_message, "internal server error");
        assert!(!api.body.errors[0].internal_message.contains("password"));
    }

    #[test]
    fn session_errors_follow_the_refresh_contract() {
        assert_eq!(ApiError::from(SessionError::Expired).body.errors[0].user_message, "TOKEN EXPIRED");
        assert_eq!(ApiError::from(SessionError::Malformed).status, StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(SessionError::InvalidSignature).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(api_forbidden("denied").body.errors[0].user_message, "FORBIDDEN");
    }
}
