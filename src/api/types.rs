//! HTTP request/response payloads that are not domain models.
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub internal_message: String,
    pub user_message: String,
}

/// Error envelope: `result` is always absent.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ErrorBody {
    pub code: u16,
    pub status: String,
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub backend: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct NameQuery {
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SelfRegisterCheck {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
pub struct SelfRegistrationRoles {
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TerminalAccessUpdate {
    /// `false` when the trigger preset already carried terminal access.
    pub updated: bool,
}
