//! Persistence layer for users, roles, groups, presets, SSO, and policy tuples.
//!
//! # Purpose
//! Declares the repository traits consumed by the services and the policy
//! engine, with in-memory and Postgres implementations.
//!
//! # Notes
//! Every multi-table mutation is one call so the backend can run it in a single
//! transaction; policy-engine mutations happen only after such a call returns.
use crate::model::{
    DefaultRbacRoleData, Policy, RbacPolicyData, RbacRoleData, Role, RoleFilter, RoleGroup,
    SsoLoginModel, User, UserAudit, UserType,
};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// User row to insert (`id == None`) or update and reactivate.
#[derive(Debug, Clone)]
pub struct UserUpsert {
    pub id: Option<i32>,
    pub email: String,
    pub user_type: UserType,
    pub access_token: Option<String>,
}

/// Group row to insert (`id == None`) or update.
#[derive(Debug, Clone)]
pub struct GroupUpsert {
    pub id: Option<i32>,
    pub name: String,
    pub casbin_name: String,
    pub description: String,
}

/// Role mapping changes applied together with a user or group write.
///
/// `new_roles` are inserted first (an existing row with the same name wins),
/// then every name in `grant` is mapped and every id in `revoke` unmapped.
#[derive(Debug, Clone, Default)]
pub struct GrantPlan {
    pub new_roles: Vec<Role>,
    pub grant: Vec<String>,
    pub revoke: Vec<i32>,
}

/// Result of a grant write: the saved subject, every granted role (new or
/// already mapped), and the roles actually unmapped.
#[derive(Debug, Clone)]
pub struct GrantOutcome<T> {
    pub subject: T,
    pub granted: Vec<Role>,
    pub revoked: Vec<Role>,
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Case-insensitive lookup preferring the active row.
    async fn fetch_active_or_deleted_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn get_user(&self, id: i32) -> StoreResult<User>;
    async fn get_user_include_deleted(&self, id: i32) -> StoreResult<User>;
    async fn list_active_users(&self) -> StoreResult<Vec<User>>;
    async fn roles_for_user(&self, user_id: i32) -> StoreResult<Vec<Role>>;
    async fn save_user_with_grants(
        &self,
        user: UserUpsert,
        plan: &GrantPlan,
        actor: i32,
    ) -> StoreResult<GrantOutcome<User>>;
    /// Soft-delete the user and drop every `user_roles` row it owns.
    async fn deactivate_user(&self, user_id: i32, actor: i32) -> StoreResult<User>;
    async fn upsert_user_audit(&self, user_id: i32, client_ip: &str) -> StoreResult<()>;
    async fn get_user_audit(&self, user_id: i32) -> StoreResult<Option<UserAudit>>;
    /// `(email, role)` for every mapping of an active user.
    async fn list_active_user_role_pairs(&self) -> StoreResult<Vec<(String, String)>>;
}

#[async_trait]
pub trait RoleRepo: Send + Sync {
    async fn get_role_by_filter(&self, selector: &RoleFilter) -> StoreResult<Option<Role>>;
    async fn get_roles_by_names(&self, names: &[String]) -> StoreResult<Vec<Role>>;
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
    async fn roles_by_entity_access_type_and_action(
        &self,
        entity: &str,
        access_type: &str,
        action: &str,
    ) -> StoreResult<Vec<Role>>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn get_group(&self, id: i32) -> StoreResult<RoleGroup>;
    async fn get_groups_by_names(&self, names: &[String]) -> StoreResult<Vec<RoleGroup>>;
    async fn get_groups_by_casbin_names(&self, names: &[String]) -> StoreResult<Vec<RoleGroup>>;
    async fn list_groups(&self) -> StoreResult<Vec<RoleGroup>>;
    async fn roles_for_group(&self, group_id: i32) -> StoreResult<Vec<Role>>;
    async fn save_group_with_grants(
        &self,
        group: GroupUpsert,
        plan: &GrantPlan,
        actor: i32,
    ) -> StoreResult<GrantOutcome<RoleGroup>>;
    /// Soft-delete the group and drop its role mappings.
    async fn deactivate_group(&self, group_id: i32, actor: i32) -> StoreResult<RoleGroup>;
    async fn inactive_group_casbin_names(&self) -> StoreResult<Vec<String>>;
    /// `(casbin_name, role)` for every mapping of an active group.
    async fn list_active_group_role_pairs(&self) -> StoreResult<Vec<(String, String)>>;
}

#[async_trait]
pub trait PresetRepo: Send + Sync {
    async fn list_role_data(&self) -> StoreResult<Vec<RbacRoleData>>;
    async fn list_policy_data(&self) -> StoreResult<Vec<RbacPolicyData>>;
    async fn get_role_data(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> StoreResult<Option<RbacRoleData>>;
    async fn get_role_data_by_id(&self, id: i32) -> StoreResult<RbacRoleData>;
    async fn get_policy_data(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> StoreResult<Option<RbacPolicyData>>;
    /// Upsert both halves of a preset by `(entity, access_type, role)` and
    /// clear the deleted flag.
    async fn save_preset(
        &self,
        role_data: RbacRoleData,
        policy_data: RbacPolicyData,
        actor: i32,
    ) -> StoreResult<(RbacRoleData, RbacPolicyData)>;
    async fn mark_preset_deleted(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
        actor: i32,
    ) -> StoreResult<()>;
    async fn list_declared_presets(&self) -> StoreResult<Vec<DefaultRbacRoleData>>;
    /// Insert declared presets that are not present yet; returns the count inserted.
    async fn seed_declared_presets(&self, presets: &[DefaultRbacRoleData]) -> StoreResult<usize>;
}

#[async_trait]
pub trait SsoRepo: Send + Sync {
    async fn list_sso(&self) -> StoreResult<Vec<SsoLoginModel>>;
    async fn get_sso(&self, id: i32) -> StoreResult<SsoLoginModel>;
    async fn get_sso_by_name(&self, name: &str) -> StoreResult<Option<SsoLoginModel>>;
    async fn active_sso(&self) -> StoreResult<Option<SsoLoginModel>>;
    /// Insert (`id == 0`) or update; an active row deactivates every other row.
    async fn save_sso(&self, model: SsoLoginModel, actor: i32) -> StoreResult<SsoLoginModel>;
}

#[async_trait]
pub trait SelfRegistrationRepo: Send + Sync {
    async fn self_registration_roles(&self) -> StoreResult<Vec<String>>;
    async fn set_self_registration_roles(&self, roles: &[String], actor: i32) -> StoreResult<()>;
}

/// Durable backing for the policy engine's tuples.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    async fn load_policy_rules(&self) -> StoreResult<Vec<Policy>>;
    async fn save_policy_rules(&self, policies: &[Policy]) -> StoreResult<()>;
    async fn remove_policy_rules(&self, policies: &[Policy]) -> StoreResult<()>;
}

#[async_trait]
pub trait AuthStore:
    UserRepo + RoleRepo + GroupRepo + PresetRepo + SsoRepo + SelfRegistrationRepo + Send + Sync
{
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
