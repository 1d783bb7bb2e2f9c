//! Identity and RBAC data model.
//!
//! # Purpose
//! Re-exports users, roles, role filters, role groups, preset templates,
//! policy tuples, and SSO settings shared by the store, services, and API.
mod policy;
mod preset;
mod role;
mod role_group;
mod sso;
mod user;

pub use policy::{Policy, PolicyType};
pub use preset::{
    DefaultRbacRoleData, PValDetailObj, PValUpdateKey, PolicyCacheDetailObj, RbacPolicyData,
    RbacPolicyResource, RbacRoleData, RbacRoleDto, ResActObj, RoleCacheDetailObj, TemplatePart,
};
pub use role::{
    ACCESS_TYPE_DEVTRON_APP, ACCESS_TYPE_HELM_APP, ACTION_SUPER_ADMIN, ACTION_UPDATE, EMPTY_SENTINEL,
    ENTITY_APPS, ENTITY_CHART_GROUP, ENTITY_CLUSTER, Role, RoleFilter, RoleFilterStatus,
    SUPER_ADMIN_ROLE, role_matches_selector,
};
pub use role_group::{RoleGroup, RoleGroupInfo, casbin_name_for};
pub use sso::SsoLoginModel;
pub use user::{User, UserAudit, UserInfo, UserType};
