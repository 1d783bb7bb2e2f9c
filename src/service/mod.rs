//! Identity services: role resolution, users, role groups, presets, and SSO.
//!
//! # Purpose
//! Holds the business rules between the HTTP handlers and the store/engine
//! pair. Every mutating call writes the store first (one transaction) and only
//! then pushes tuple changes to the policy engine.
//!
//! # Failure semantics
//! Store errors abort the call. Engine errors after a successful commit are
//! logged and swallowed; the mirror reconciliation restores the tuples.
use crate::auth::rbac::enforcer::PolicyEngine;
use crate::auth::rbac::{ACTION_GET, RESOURCE_GLOBAL, RESOURCE_USER};
use crate::auth::rbac::catalog::CatalogError;
use crate::model::{Policy, Role, RoleFilter};
use crate::store::StoreError;
use thiserror::Error;

pub mod preset_sync;
pub mod resolver;
pub mod role_group;
pub mod sso;
pub mod user;

/// Id of the seeded `system` user.
pub const SYSTEM_USER_ID: i32 = 1;
/// Id of the seeded `admin` user.
pub const ADMIN_USER_ID: i32 = 2;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Conflict(what) => ServiceError::Conflict(what),
            StoreError::Unexpected(err) => ServiceError::Internal(err),
        }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        ServiceError::BadRequest(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// The authenticated caller of a service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser {
    pub id: i32,
    pub email: String,
    pub super_admin: bool,
}

impl ActingUser {
    /// The seeded system user, used by startup tasks.
    pub fn system() -> Self {
        Self {
            id: SYSTEM_USER_ID,
            email: "system".to_string(),
            super_admin: true,
        }
    }
}

pub(crate) fn forbidden() -> ServiceError {
    ServiceError::Forbidden("unauthorized".to_string())
}

/// `true` when `sub` may `get` the global resource on `*`, which only the
/// super-admin role grants.
pub async fn is_super_admin(engine: &dyn PolicyEngine, sub: &str) -> bool {
    engine.enforce(sub, RESOURCE_GLOBAL, ACTION_GET, "*").await
}

/// Whether `actor` may grant or revoke `filter` with `action` on the user resource.
///
/// Super-admins may manage anything. Everyone else may only manage app
/// filters outside the helm access type, in teams where the engine lets them
/// perform `action` on `user` with the lowercased team as object.
pub async fn can_manage_filter(
    engine: &dyn PolicyEngine,
    actor: &ActingUser,
    filter: &RoleFilter,
    action: &str,
) -> bool {
    if actor.super_admin {
        return true;
    }
    if filter.is_super_admin() || filter.is_helm() || filter.team.is_empty() {
        return false;
    }
    engine
        .enforce(&actor.email, RESOURCE_USER, action, &filter.team.to_lowercase())
        .await
}

/// Fail with `Forbidden` unless `actor` may manage every filter.
pub async fn ensure_can_manage(
    engine: &dyn PolicyEngine,
    actor: &ActingUser,
    filters: &[RoleFilter],
    action: &str,
) -> ServiceResult<()> {
    for filter in filters {
        if !can_manage_filter(engine, actor, filter, action).await {
            return Err(forbidden());
        }
    }
    Ok(())
}

/// Same as [`ensure_can_manage`] for already stored roles.
pub async fn ensure_can_manage_roles(
    engine: &dyn PolicyEngine,
    actor: &ActingUser,
    roles: &[Role],
    action: &str,
) -> ServiceResult<()> {
    let filters: Vec<RoleFilter> = roles.iter().map(Role::scope).collect();
    ensure_can_manage(engine, actor, &filters, action).await
}

/// Push tuple changes after a commit. Removals run first so a re-grant in the
/// same call ends up present.
pub(crate) async fn push_policy_changes(
    engine: &dyn PolicyEngine,
    remove: Vec<Policy>,
    add: Vec<Policy>,
) {
    if !remove.is_empty()
        && let Err(err) = engine.remove_policies(&remove).await
    {
        tracing::error!(error = %err, count = remove.len(), "policy removal failed after commit");
    }
    if !add.is_empty()
        && let Err(err) = engine.add_policies(&add).await
    {
        tracing::error!(error = %err, count = add.len(), "policy add failed after commit");
    }
}

/// Trim, validate, and deduplicate a comma-separated email list.
///
/// # Errors
/// - `BadRequest` when the list is empty or an address is malformed.
pub fn parse_emails(raw: &str) -> ServiceResult<Vec<String>> {
    let mut emails: Vec<String> = Vec::new();
    for token in raw.split(',') {
        let email = token.trim();
        if email.is_empty() {
            continue;
        }
        if !is_valid_email(email) {
            return Err(ServiceError::BadRequest(format!("invalid email: {email}")));
        }
        if !emails.iter().any(|e| e.eq_ignore_ascii_case(email)) {
            emails.push(email.to_string());
        }
    }
    if emails.is_empty() {
        return Err(ServiceError::BadRequest("email_id is required".to_string()));
    }
    Ok(emails)
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(|c| c.is_whitespace() || c == ',')
}
