//! SSO provider configuration rows.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// One identity-provider configuration. At most one row is active; its `url`
/// is the externally reachable orchestrator URL the OIDC proxy hangs off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SsoLoginModel {
    pub id: i32,
    pub name: String,
    pub url: String,
    #[schema(value_type = Object)]
    pub config: Value,
    pub active: bool,
}
