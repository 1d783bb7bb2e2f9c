//! User records and the user grant request payload.
//!
//! # Purpose
//! Defines the stored `User` row, login audit rows, and the `UserInfo` shape
//! accepted and returned by the user endpoints.
use super::role::{RoleFilter, RoleFilterStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum UserType {
    #[default]
    Human,
    ApiToken,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Human => "human",
            UserType::ApiToken => "api-token",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "api-token" => UserType::ApiToken,
            _ => UserType::Human,
        }
    }
}

/// Stored user row. `email` is the stable external identifier and the
/// subject of the user's `g` edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub access_token: Option<String>,
    pub user_type: UserType,
    pub active: bool,
    pub created_on: DateTime<Utc>,
    pub created_by: i32,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserAudit {
    pub user_id: i32,
    pub client_ip: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// Grant request and user view.
///
/// `email_id` may carry several comma-separated addresses on create. The
/// `roles` list is only used by self-registration and role checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct UserInfo {
    pub id: i32,
    #[serde(rename = "email_id")]
    pub email_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    pub exist: bool,
    pub role_filters: Vec<RoleFilter>,
    pub groups: Vec<String>,
    pub super_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub role_filter_statuses: Vec<RoleFilterStatus>,
}
