//! User service: grants, group membership, and the user views.
//!
//! # Purpose
//! Creates, updates, and deletes users together with their role mappings and
//! group edges, and derives the `RoleFilter` view returned by the API.
//!
//! # Key invariants
//! - Role mappings live in `user_roles`; group membership lives only in the
//!   engine as `(g, email, group:<slug>)` edges.
//! - Only a super-admin may create, change, or remove a super-admin user.
//! - Non-super-admin actors only revoke roles they could also grant.
use super::preset_sync::reconcile_mirror;
use super::resolver::{ResolvedGrants, RoleResolver, normalize_filter};
use super::{
    ADMIN_USER_ID, ActingUser, SYSTEM_USER_ID, ServiceError, ServiceResult, can_manage_filter,
    ensure_can_manage, ensure_can_manage_roles, forbidden, is_super_admin, parse_emails,
    push_policy_changes,
};
use crate::observability;
use crate::auth::rbac::enforcer::PolicyEngine;
use crate::auth::rbac::{ACTION_CREATE, ACTION_DELETE, ACTION_UPDATE};
use crate::model::{Policy, Role, RoleFilter, RoleGroup, User, UserInfo, UserType};
use crate::store::{AuthStore, GrantPlan, UserUpsert};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

const GROUP_PREFIX: &str = "group:";

/// Whether stored grants not named in the request survive the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrantMode {
    /// Create on an existing user: add to what is there.
    Merge,
    /// Update: the request is the complete desired state.
    Replace,
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn AuthStore>,
    engine: Arc<dyn PolicyEngine>,
    resolver: RoleResolver,
}

impl UserService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        engine: Arc<dyn PolicyEngine>,
        resolver: RoleResolver,
    ) -> Self {
        Self {
            store,
            engine,
            resolver,
        }
    }

    /// Create users for every address in `info.email_id`.
    ///
    /// # What it does
    /// An active user with the same email (case-insensitive) keeps its grants
    /// and gains the requested ones; a deleted one is revived with exactly the
    /// requested grants; otherwise a new row is inserted.
    ///
    /// # Errors
    /// - `BadRequest` for malformed emails or unknown groups.
    /// - `Forbidden` when the actor may not grant a filter or super-admin.
    pub async fn create_user(
        &self,
        info: UserInfo,
        actor: &ActingUser,
    ) -> ServiceResult<Vec<UserInfo>> {
        let emails = parse_emails(&info.email_id)?;
        let filters: Vec<RoleFilter> = info.role_filters.iter().map(normalize_filter).collect();
        if info.super_admin && !actor.super_admin {
            return Err(forbidden());
        }
        ensure_can_manage(self.engine.as_ref(), actor, &filters, ACTION_CREATE).await?;
        let groups = self.lookup_groups(&info.groups).await?;
        self.ensure_can_manage_groups(actor, &groups).await?;

        let mut created = Vec::with_capacity(emails.len());
        for email in emails {
            let existing = self.store.fetch_active_or_deleted_by_email(&email).await?;
            let mode = match &existing {
                Some(user) if user.active => GrantMode::Merge,
                _ => GrantMode::Replace,
            };
            let view = self
                .apply_grants(existing, &email, &filters, &groups, info.super_admin, actor, mode)
                .await?;
            created.push(view);
        }
        Ok(created)
    }

    /// Replace a user's grants and groups with the requested ones.
    ///
    /// # Errors
    /// - `NotFound` for a missing or inactive user.
    /// - `BadRequest` when `email_id` names a different address.
    /// - `Forbidden` per the super-admin gate and team permissions.
    pub async fn update_user(&self, info: UserInfo, actor: &ActingUser) -> ServiceResult<UserInfo> {
        let user = self.store.get_user(info.id).await?;
        let requested = info.email_id.trim();
        let email = if requested.is_empty() {
            user.email.clone()
        } else if requested.eq_ignore_ascii_case(&user.email) {
            requested.to_string()
        } else {
            return Err(ServiceError::BadRequest(
                "email_id cannot be changed".to_string(),
            ));
        };
        if info.super_admin && !actor.super_admin {
            return Err(forbidden());
        }
        let filters: Vec<RoleFilter> = info.role_filters.iter().map(normalize_filter).collect();
        ensure_can_manage(self.engine.as_ref(), actor, &filters, ACTION_UPDATE).await?;
        let groups = self.lookup_groups(&info.groups).await?;
        self.apply_grants(
            Some(user),
            &email,
            &filters,
            &groups,
            info.super_admin,
            actor,
            GrantMode::Replace,
        )
        .await
    }

    /// Core of create and update.
    ///
    /// Step order: gate, resolve, plan revocations, store write, engine push.
    #[allow(clippy::too_many_arguments)]
    async fn apply_grants(
        &self,
        target: Option<User>,
        email: &str,
        filters: &[RoleFilter],
        groups: &[RoleGroup],
        super_admin: bool,
        actor: &ActingUser,
        mode: GrantMode,
    ) -> ServiceResult<UserInfo> {
        // Step 1: the super-admin gate on the target's current state.
        let current_roles = match &target {
            Some(user) if user.active => self.store.roles_for_user(user.id).await?,
            _ => Vec::new(),
        };
        let target_is_super_admin = current_roles.iter().any(Role::is_super_admin);
        if target_is_super_admin && !actor.super_admin {
            return Err(forbidden());
        }

        // Step 2: resolve requested roles.
        let mut grants = if super_admin {
            ResolvedGrants::super_admin()
        } else {
            self.resolver.resolve(filters).await?
        };
        if mode == GrantMode::Merge {
            for role in &current_roles {
                if !grants.role_names.contains(&role.role) {
                    grants.role_names.push(role.role.clone());
                }
            }
        }

        // Step 3: revocations the actor is allowed to make.
        let desired: HashSet<&str> = grants.role_names.iter().map(String::as_str).collect();
        let mut revoke = Vec::new();
        for role in &current_roles {
            if desired.contains(role.role.as_str()) {
                continue;
            }
            if can_manage_filter(self.engine.as_ref(), actor, &role.scope(), ACTION_UPDATE).await {
                revoke.push(role.id);
            }
        }

        // Step 4: group edges, diffed against the engine.
        let previous_email = target.as_ref().map(|u| u.email.clone());
        let current_groups = match &previous_email {
            Some(old) => self.group_edges(old).await,
            None => Vec::new(),
        };
        let mut wanted_groups: Vec<String> = groups.iter().map(|g| g.casbin_name.clone()).collect();
        if mode == GrantMode::Merge {
            for name in &current_groups {
                if !wanted_groups.contains(name) {
                    wanted_groups.push(name.clone());
                }
            }
        }
        let dropped_groups: Vec<String> = current_groups
            .iter()
            .filter(|name| !wanted_groups.contains(name))
            .cloned()
            .collect();
        if !actor.super_admin && !dropped_groups.is_empty() {
            let dropped = self.store.get_groups_by_casbin_names(&dropped_groups).await?;
            self.ensure_can_manage_groups(actor, &dropped).await?;
        }

        // Step 5: one store write.
        let actor_id = if filters.iter().any(RoleFilter::is_helm) {
            SYSTEM_USER_ID
        } else {
            actor.id
        };
        let upsert = UserUpsert {
            id: target.as_ref().map(|u| u.id),
            email: email.to_string(),
            user_type: target.as_ref().map(|u| u.user_type).unwrap_or(UserType::Human),
            access_token: None,
        };
        let outcome = self
            .store
            .save_user_with_grants(upsert, &grants.plan(revoke), actor_id)
            .await?;
        let subject = outcome.subject.email.clone();

        // Step 6: mirror into the engine.
        let mut remove: Vec<Policy> = Vec::new();
        let renamed = previous_email
            .as_deref()
            .is_some_and(|old| old != subject);
        if renamed && let Some(old) = previous_email.as_deref() {
            if let Err(err) = self.engine.delete_roles_for_user(old).await {
                tracing::error!(error = %err, email = %old, "dropping edges of old email failed");
            }
        } else {
            remove.extend(
                outcome
                    .revoked
                    .iter()
                    .map(|role| Policy::grouping(&subject, &role.role)),
            );
            remove.extend(
                dropped_groups
                    .iter()
                    .map(|name| Policy::grouping(&subject, name)),
            );
        }
        let mut add = grants.policies.clone();
        add.extend(
            outcome
                .granted
                .iter()
                .map(|role| Policy::grouping(&subject, &role.role)),
        );
        add.extend(
            wanted_groups
                .iter()
                .map(|name| Policy::grouping(&subject, name)),
        );
        push_policy_changes(self.engine.as_ref(), remove, add).await;

        let op = if target.is_some() { "update" } else { "create" };
        metrics::counter!(observability::USER_MUTATIONS_TOTAL, "op" => op).increment(1);
        tracing::info!(
            email = %subject,
            granted = outcome.granted.len(),
            revoked = outcome.revoked.len(),
            "user grants saved"
        );

        let mut view = self.view(&outcome.subject).await?;
        view.role_filter_statuses = grants.statuses;
        Ok(view)
    }

    /// Soft-delete a user and drop its mappings and edges.
    ///
    /// # Errors
    /// - `BadRequest` for the seeded system and admin users.
    /// - `NotFound` for a missing or inactive user.
    /// - `Forbidden` per the super-admin gate and team permissions.
    pub async fn delete_user(&self, id: i32, actor: &ActingUser) -> ServiceResult<()> {
        if id == SYSTEM_USER_ID || id == ADMIN_USER_ID {
            return Err(ServiceError::BadRequest(
                "the system and admin users cannot be deleted".to_string(),
            ));
        }
        let user = self.store.get_user(id).await?;
        let roles = self.store.roles_for_user(id).await?;
        if !actor.super_admin {
            if roles.iter().any(Role::is_super_admin) {
                return Err(forbidden());
            }
            ensure_can_manage_roles(self.engine.as_ref(), actor, &roles, ACTION_DELETE).await?;
        }
        self.store.deactivate_user(id, actor.id).await?;
        if let Err(err) = self.engine.delete_roles_for_user(&user.email).await {
            tracing::error!(error = %err, email = %user.email, "dropping user edges failed");
        }
        metrics::counter!(observability::USER_MUTATIONS_TOTAL, "op" => "delete").increment(1);
        tracing::info!(email = %user.email, "user deleted");
        Ok(())
    }

    pub async fn get_by_id(&self, id: i32) -> ServiceResult<UserInfo> {
        let user = self.store.get_user(id).await?;
        self.view(&user).await
    }

    /// Every active user with its grants.
    pub async fn get_all(&self) -> ServiceResult<Vec<UserInfo>> {
        let users = self.store.list_active_users().await?;
        let mut views = Vec::with_capacity(users.len());
        for user in users {
            views.push(self.view(&user).await?);
        }
        Ok(views)
    }

    /// Active user by email, if any.
    pub async fn user_by_email(&self, email: &str) -> ServiceResult<Option<User>> {
        Ok(self
            .store
            .fetch_active_or_deleted_by_email(email)
            .await?
            .filter(|user| user.active))
    }

    /// Direct engine roles of the user plus the super-admin flag.
    pub async fn check_user_roles(&self, email: &str) -> ServiceResult<UserInfo> {
        let user = self
            .user_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("unknown user".to_string()))?;
        Ok(UserInfo {
            id: user.id,
            email_id: user.email.clone(),
            roles: self.engine.roles_for_user(&user.email).await,
            super_admin: is_super_admin(self.engine.as_ref(), &user.email).await,
            exist: true,
            ..UserInfo::default()
        })
    }

    /// Create the user behind a verified token with the self-registration roles.
    ///
    /// # Errors
    /// - `Forbidden` when self-registration is disabled.
    /// - `BadRequest` for a malformed email.
    pub async fn self_register(&self, email: &str) -> ServiceResult<UserInfo> {
        let roles = self.store.self_registration_roles().await?;
        if roles.is_empty() {
            return Err(ServiceError::Forbidden(
                "self registration is disabled".to_string(),
            ));
        }
        let email = parse_emails(email)?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::BadRequest("email is required".to_string()))?;
        let existing = self.store.fetch_active_or_deleted_by_email(&email).await?;
        if let Some(user) = &existing
            && user.active
        {
            return self.view(user).await;
        }

        let known: Vec<String> = self
            .store
            .get_roles_by_names(&roles)
            .await?
            .into_iter()
            .map(|role| role.role)
            .collect();
        for missing in roles.iter().filter(|name| !known.contains(name)) {
            tracing::warn!(role = %missing, "self-registration role does not exist");
        }
        let plan = GrantPlan {
            grant: known,
            ..GrantPlan::default()
        };
        let outcome = self
            .store
            .save_user_with_grants(
                UserUpsert {
                    id: existing.map(|u| u.id),
                    email,
                    user_type: UserType::Human,
                    access_token: None,
                },
                &plan,
                SYSTEM_USER_ID,
            )
            .await?;
        let edges: Vec<Policy> = outcome
            .granted
            .iter()
            .map(|role| Policy::grouping(&outcome.subject.email, &role.role))
            .collect();
        push_policy_changes(self.engine.as_ref(), Vec::new(), edges).await;
        tracing::info!(email = %outcome.subject.email, "user self-registered");
        self.view(&outcome.subject).await
    }

    /// Record a successful login. Failures are logged only.
    pub async fn save_login_audit(&self, user_id: i32, client_ip: &str) {
        if let Err(err) = self.store.upsert_user_audit(user_id, client_ip).await {
            tracing::warn!(error = %err, user_id, "login audit failed");
        }
    }

    /// Re-assert the user/group/role mirror in the engine.
    pub async fn sync_orchestrator_to_casbin(&self, actor: &ActingUser) -> ServiceResult<()> {
        if !actor.super_admin {
            return Err(forbidden());
        }
        reconcile_mirror(self.store.as_ref(), self.engine.as_ref(), &self.resolver).await?;
        Ok(())
    }

    async fn view(&self, user: &User) -> ServiceResult<UserInfo> {
        let roles = self.store.roles_for_user(user.id).await?;
        let groups = self.group_names(&user.email).await?;
        let audit = self.store.get_user_audit(user.id).await?;
        Ok(UserInfo {
            id: user.id,
            email_id: user.email.clone(),
            user_type: Some(user.user_type),
            exist: user.active,
            super_admin: roles.iter().any(Role::is_super_admin),
            role_filters: role_filters_from_roles(&roles),
            groups,
            last_login_time: audit.map(|a| a.updated_on),
            ..UserInfo::default()
        })
    }

    async fn group_edges(&self, email: &str) -> Vec<String> {
        self.engine
            .roles_for_user(email)
            .await
            .into_iter()
            .filter(|role| role.starts_with(GROUP_PREFIX))
            .collect()
    }

    async fn group_names(&self, email: &str) -> ServiceResult<Vec<String>> {
        let edges = self.group_edges(email).await;
        if edges.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .get_groups_by_casbin_names(&edges)
            .await?
            .into_iter()
            .map(|group| group.name)
            .collect())
    }

    async fn lookup_groups(&self, names: &[String]) -> ServiceResult<Vec<RoleGroup>> {
        let mut wanted: Vec<String> = Vec::new();
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if !wanted.iter().any(|w| w.eq_ignore_ascii_case(name)) {
                wanted.push(name.to_string());
            }
        }
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.store.get_groups_by_names(&wanted).await?;
        for name in &wanted {
            if !found.iter().any(|g| g.name.eq_ignore_ascii_case(name)) {
                return Err(ServiceError::BadRequest(format!("unknown group: {name}")));
            }
        }
        Ok(found)
    }

    async fn ensure_can_manage_groups(
        &self,
        actor: &ActingUser,
        groups: &[RoleGroup],
    ) -> ServiceResult<()> {
        if actor.super_admin {
            return Ok(());
        }
        for group in groups {
            let roles = self.store.roles_for_group(group.id).await?;
            ensure_can_manage_roles(self.engine.as_ref(), actor, &roles, ACTION_UPDATE).await?;
        }
        Ok(())
    }
}

fn append_csv(list: &mut String, value: &str) {
    if !list.split(',').any(|existing| existing == value) {
        list.push(',');
        list.push_str(value);
    }
}

/// Collapse stored roles into the filters a client would send.
///
/// # What it does
/// - App roles group by `(team, action, accessType)`; environments and entity
///   names coalesce into comma-separated lists. An environment list holding
///   `""` (all environments) absorbs later environments.
/// - Cluster roles group by `(cluster, action)`; namespace, group, kind, and
///   resource coalesce the same way, `""` absorbing.
/// - Other entities group by `(entity, action)`; entity names coalesce.
/// - The super-admin role is omitted.
pub fn role_filters_from_roles(roles: &[Role]) -> Vec<RoleFilter> {
    let mut grouped: BTreeMap<String, RoleFilter> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for role in roles.iter().filter(|r| !r.is_super_admin()) {
        let scope = role.scope();
        let key = if !role.team.is_empty() {
            format!("team_{}_{}_{}", role.team, role.action, role.access_type)
        } else if scope.is_cluster() {
            format!("cluster_{}_{}", role.cluster, role.action)
        } else {
            format!("entity_{}_{}_{}", role.entity, role.action, role.access_type)
        };
        let Some(filter) = grouped.get_mut(&key) else {
            order.push(key.clone());
            grouped.insert(key, scope);
            continue;
        };
        if scope.is_cluster() {
            for (list, value) in [
                (&mut filter.namespace, &role.namespace),
                (&mut filter.group, &role.group),
                (&mut filter.kind, &role.kind),
                (&mut filter.resource, &role.resource),
            ] {
                if !list.split(',').any(str::is_empty) {
                    append_csv(list, value);
                }
            }
            continue;
        }
        if !filter.environment.split(',').any(str::is_empty) {
            append_csv(&mut filter.environment, &role.environment);
        }
        append_csv(&mut filter.entity_name, &role.entity_name);
    }
    order
        .into_iter()
        .filter_map(|key| grouped.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ACCESS_TYPE_HELM_APP, ENTITY_APPS};

    fn role(team: &str, env: &str, app: &str, action: &str) -> Role {
        Role {
            role: format!("role:{action}_{team}_{env}_{app}"),
            entity: ENTITY_APPS.to_string(),
            team: team.to_string(),
            environment: env.to_string(),
            entity_name: app.to_string(),
            action: action.to_string(),
            ..Role::default()
        }
    }

    #[test]
    fn app_roles_collapse_by_team_action_access_type() {
        let roles = vec![
            role("T", "e1", "a", "admin"),
            role("T", "e2", "b", "admin"),
            role("T", "e1", "b", "admin"),
            role("U", "e1", "a", "view"),
        ];
        let filters = role_filters_from_roles(&roles);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].environment, "e1,e2");
        assert_eq!(filters[0].entity_name, "a,b");
        assert_eq!(filters[1].team, "U");
    }

    #[test]
    fn all_environments_absorbs_later_environments() {
        let roles = vec![role("T", "", "a", "view"), role("T", "e2", "a", "view")];
        let filters = role_filters_from_roles(&roles);
        assert_eq!(filters[0].environment, "");
    }

    #[test]
    fn access_type_and_super_admin_shape_the_view() {
        let mut helm = role("T", "e1", "a", "view");
        helm.access_type = ACCESS_TYPE_HELM_APP.to_string();
        let super_admin = Role {
            role: crate::model::SUPER_ADMIN_ROLE.to_string(),
            action: crate::model::ACTION_SUPER_ADMIN.to_string(),
            ..Role::default()
        };
        let filters =
            role_filters_from_roles(&[role("T", "e1", "a", "view"), helm, super_admin]);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1].access_type, ACCESS_TYPE_HELM_APP);
    }
}
