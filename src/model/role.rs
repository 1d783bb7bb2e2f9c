//! Role rows and the filters that name them.
//!
//! # Purpose
//! Defines the scoping vector stored in `roles`, the `RoleFilter` grant request
//! shape, and the entity/action vocabulary shared by the resolver and handlers.
//!
//! # Notes
//! Empty strings mean "unscoped" everywhere in memory; the Postgres store maps
//! them to `NULL` columns and back.
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const ENTITY_APPS: &str = "apps";
pub const ENTITY_CLUSTER: &str = "cluster";
pub const ENTITY_CHART_GROUP: &str = "chart-group";
pub const ACCESS_TYPE_DEVTRON_APP: &str = "devtron-app";
pub const ACCESS_TYPE_HELM_APP: &str = "helm-app";
pub const ACTION_SUPER_ADMIN: &str = "super-admin";
pub const ACTION_UPDATE: &str = "update";
pub const SUPER_ADMIN_ROLE: &str = "role:super-admin___";
pub const EMPTY_SENTINEL: &str = "NONE";

/// A stored role: a canonical name plus the scope it grants.
///
/// The `role` string doubles as the policy subject for the role's `p` tuples
/// and as the object of every `g` edge that grants it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: i32,
    pub role: String,
    pub entity: String,
    pub team: String,
    pub entity_name: String,
    pub environment: String,
    pub action: String,
    pub access_type: String,
    pub cluster: String,
    pub namespace: String,
    pub group: String,
    pub kind: String,
    pub resource: String,
}

impl Role {
    pub fn is_super_admin(&self) -> bool {
        self.action == ACTION_SUPER_ADMIN
    }

    /// Single-valued filter describing exactly this role's scope.
    pub fn scope(&self) -> RoleFilter {
        RoleFilter {
            entity: self.entity.clone(),
            team: self.team.clone(),
            entity_name: self.entity_name.clone(),
            environment: self.environment.clone(),
            action: self.action.clone(),
            access_type: self.access_type.clone(),
            cluster: self.cluster.clone(),
            namespace: self.namespace.clone(),
            group: self.group.clone(),
            kind: self.kind.clone(),
            resource: self.resource.clone(),
        }
    }
}

/// A grant request naming a slice of permissions.
///
/// `environment` and `entityName` (and, for cluster filters, `namespace`,
/// `group`, `kind`, `resource`) may hold comma-separated lists; the resolver
/// expands them into single-valued selectors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleFilter {
    pub entity: String,
    pub team: String,
    pub entity_name: String,
    pub environment: String,
    pub action: String,
    pub access_type: String,
    pub cluster: String,
    pub namespace: String,
    pub group: String,
    pub kind: String,
    pub resource: String,
}

impl RoleFilter {
    pub fn is_cluster(&self) -> bool {
        self.entity == ENTITY_CLUSTER
    }

    pub fn is_super_admin(&self) -> bool {
        self.action == ACTION_SUPER_ADMIN
    }

    pub fn is_helm(&self) -> bool {
        self.access_type == ACCESS_TYPE_HELM_APP
    }

    /// Global entities are scoped by entity alone (no team, not cluster).
    pub fn is_global_entity(&self) -> bool {
        !self.entity.is_empty() && self.entity != ENTITY_APPS && !self.is_cluster()
    }

    /// Identity used to deduplicate filters when merging grant requests.
    pub fn merge_key(&self) -> String {
        [
            self.entity.as_str(),
            self.team.as_str(),
            self.environment.as_str(),
            self.entity_name.as_str(),
            self.action.as_str(),
            self.access_type.as_str(),
            self.cluster.as_str(),
            self.namespace.as_str(),
            self.group.as_str(),
            self.kind.as_str(),
            self.resource.as_str(),
        ]
        .join("-")
    }

    pub fn is_empty(&self) -> bool {
        *self == RoleFilter::default()
    }
}

/// Status note attached to a filter the resolver could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleFilterStatus {
    pub filter: RoleFilter,
    pub status: String,
}

/// Decide whether `role` is the row a lookup by `selector` returns.
///
/// # What it does
/// Applies the lookup rules per filter shape:
/// - super-admin: action matches and every scoping column is empty;
/// - cluster: cluster, namespace, group, kind, resource compared exactly
///   (empty means an unset column);
/// - global entity: entity, access type, and action, plus the entity name
///   when the action is `update` and a name is given;
/// - apps: team, environment, entity name, action, and access type.
///
/// `selector` must already be single-valued and normalized.
pub fn role_matches_selector(role: &Role, selector: &RoleFilter) -> bool {
    if selector.is_super_admin() {
        return role.is_super_admin()
            && role.entity.is_empty()
            && role.team.is_empty()
            && role.entity_name.is_empty()
            && role.environment.is_empty()
            && role.cluster.is_empty();
    }
    if role.action != selector.action || role.access_type != selector.access_type {
        return false;
    }
    if selector.is_cluster() {
        return role.entity == ENTITY_CLUSTER
            && role.cluster == selector.cluster
            && role.namespace == selector.namespace
            && role.group == selector.group
            && role.kind == selector.kind
            && role.resource == selector.resource;
    }
    if selector.is_global_entity() {
        if role.entity != selector.entity {
            return false;
        }
        if selector.action == ACTION_UPDATE {
            return !selector.entity_name.is_empty() && role.entity_name == selector.entity_name;
        }
        return true;
    }
    role.entity == ENTITY_APPS
        && role.team == selector.team
        && role.environment == selector.environment
        && role.entity_name == selector.entity_name
}
