//! Role groups and their grant payload.
use super::role::{RoleFilter, RoleFilterStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleGroup {
    pub id: i32,
    pub name: String,
    pub casbin_name: String,
    pub description: String,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleGroupInfo {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub casbin_name: String,
    pub role_filters: Vec<RoleFilter>,
    pub super_admin: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub role_filter_statuses: Vec<RoleFilterStatus>,
}

/// Subject used for a group's `g` edges: `group:` plus the lowercased name
/// with spaces replaced by underscores.
pub fn casbin_name_for(name: &str) -> String {
    format!("group:{}", name.trim().to_lowercase().replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casbin_name_is_lowercase_slug() {
        assert_eq!(casbin_name_for("Release Managers"), "group:release_managers");
        assert_eq!(casbin_name_for("ops"), "group:ops");
    }
}
