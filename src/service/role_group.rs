//! Role-group service.
//!
//! # Purpose
//! CRUD over role groups and their role mappings. A group's grants are
//! mirrored as `(g, group:<slug>, role)` edges; users join a group through
//! `(g, email, group:<slug>)` edges owned by the user service.
use super::resolver::{ResolvedGrants, RoleResolver, normalize_filter};
use super::user::role_filters_from_roles;
use super::{
    ActingUser, ServiceError, ServiceResult, can_manage_filter, ensure_can_manage,
    ensure_can_manage_roles, forbidden, push_policy_changes,
};
use crate::auth::rbac::enforcer::PolicyEngine;
use crate::auth::rbac::{ACTION_CREATE, ACTION_DELETE, ACTION_UPDATE};
use crate::model::{Policy, Role, RoleFilter, RoleGroup, RoleGroupInfo, casbin_name_for};
use crate::store::{AuthStore, GroupUpsert};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct RoleGroupService {
    store: Arc<dyn AuthStore>,
    engine: Arc<dyn PolicyEngine>,
    resolver: RoleResolver,
}

fn validate_name(name: &str) -> ServiceResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::BadRequest("role group name is required".to_string()));
    }
    if name.contains(',') {
        return Err(ServiceError::BadRequest(
            "role group name may not contain ','".to_string(),
        ));
    }
    Ok(name.to_string())
}

impl RoleGroupService {
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

    /// Create a group and grant its filters.
    ///
    /// # Errors
    /// - `BadRequest` for an empty or malformed name.
    /// - `Conflict` when an active group already has the name or its casbin subject.
    /// - `Forbidden` when the actor may not grant a filter or super-admin.
    pub async fn create_role_group(
        &self,
        info: RoleGroupInfo,
        actor: &ActingUser,
    ) -> ServiceResult<RoleGroupInfo> {
        let name = validate_name(&info.name)?;
        if info.super_admin && !actor.super_admin {
            return Err(forbidden());
        }
        let filters: Vec<RoleFilter> = info.role_filters.iter().map(normalize_filter).collect();
        ensure_can_manage(self.engine.as_ref(), actor, &filters, ACTION_CREATE).await?;
        let casbin_name = casbin_name_for(&name);
        let upsert = GroupUpsert {
            id: None,
            name,
            casbin_name,
            description: info.description.trim().to_string(),
        };
        self.apply_grants(upsert, Vec::new(), &filters, info.super_admin, actor)
            .await
    }

    /// Replace a group's grants; the name is kept.
    ///
    /// # Errors
    /// - `NotFound` for a missing or inactive group.
    /// - `Forbidden` per the super-admin gate and team permissions.
    pub async fn update_role_group(
        &self,
        info: RoleGroupInfo,
        actor: &ActingUser,
    ) -> ServiceResult<RoleGroupInfo> {
        let group = self.store.get_group(info.id).await?;
        if info.super_admin && !actor.super_admin {
            return Err(forbidden());
        }
        let filters: Vec<RoleFilter> = info.role_filters.iter().map(normalize_filter).collect();
        ensure_can_manage(self.engine.as_ref(), actor, &filters, ACTION_UPDATE).await?;
        let current = self.store.roles_for_group(group.id).await?;
        let upsert = GroupUpsert {
            id: Some(group.id),
            name: group.name,
            casbin_name: group.casbin_name,
            description: info.description.trim().to_string(),
        };
        self.apply_grants(upsert, current, &filters, info.super_admin, actor)
            .await
    }

    async fn apply_grants(
        &self,
        upsert: GroupUpsert,
        current: Vec<Role>,
        filters: &[RoleFilter],
        super_admin: bool,
        actor: &ActingUser,
    ) -> ServiceResult<RoleGroupInfo> {
        // Step 1: gate on the group's current grants.
        if current.iter().any(Role::is_super_admin) && !actor.super_admin {
            return Err(forbidden());
        }

        // Step 2: resolve and plan.
        let grants = if super_admin {
            ResolvedGrants::super_admin()
        } else {
            self.resolver.resolve(filters).await?
        };
        let desired: HashSet<&str> = grants.role_names.iter().map(String::as_str).collect();
        let mut revoke = Vec::new();
        for role in &current {
            if !desired.contains(role.role.as_str())
                && can_manage_filter(self.engine.as_ref(), actor, &role.scope(), ACTION_UPDATE)
                    .await
            {
                revoke.push(role.id);
            }
        }

        // Step 3: store write, then engine.
        let outcome = self
            .store
            .save_group_with_grants(upsert, &grants.plan(revoke), actor.id)
            .await?;
        let subject = outcome.subject.casbin_name.clone();
        let remove: Vec<Policy> = outcome
            .revoked
            .iter()
            .map(|role| Policy::grouping(&subject, &role.role))
            .collect();
        let mut add = grants.policies.clone();
        add.extend(
            outcome
                .granted
                .iter()
                .map(|role| Policy::grouping(&subject, &role.role)),
        );
        push_policy_changes(self.engine.as_ref(), remove, add).await;
        tracing::info!(
            group = %outcome.subject.name,
            granted = outcome.granted.len(),
            revoked = outcome.revoked.len(),
            "role group grants saved"
        );

        let mut view = self.view(outcome.subject).await?;
        view.role_filter_statuses = grants.statuses;
        Ok(view)
    }

    /// Soft-delete a group, drop its mappings, its edges, and its members' edges.
    pub async fn delete_role_group(&self, id: i32, actor: &ActingUser) -> ServiceResult<()> {
        let group = self.store.get_group(id).await?;
        let roles = self.store.roles_for_group(id).await?;
        if !actor.super_admin {
            if roles.iter().any(Role::is_super_admin) {
                return Err(forbidden());
            }
            ensure_can_manage_roles(self.engine.as_ref(), actor, &roles, ACTION_DELETE).await?;
        }
        let group = self.store.deactivate_group(group.id, actor.id).await?;

        let mut remove: Vec<Policy> = self
            .engine
            .users_for_role(&group.casbin_name)
            .await
            .into_iter()
            .map(|member| Policy::grouping(member, &group.casbin_name))
            .collect();
        remove.extend(
            self.engine
                .roles_for_user(&group.casbin_name)
                .await
                .into_iter()
                .map(|role| Policy::grouping(&group.casbin_name, role)),
        );
        push_policy_changes(self.engine.as_ref(), remove, Vec::new()).await;
        tracing::info!(group = %group.name, "role group deleted");
        Ok(())
    }

    pub async fn fetch_role_group_by_id(&self, id: i32) -> ServiceResult<RoleGroupInfo> {
        let group = self.store.get_group(id).await?;
        self.view(group).await
    }

    /// Every active group with its filters.
    pub async fn fetch_role_groups(&self) -> ServiceResult<Vec<RoleGroupInfo>> {
        let groups = self.store.list_groups().await?;
        let mut views = Vec::with_capacity(groups.len());
        for group in groups {
            views.push(self.view(group).await?);
        }
        Ok(views)
    }

    /// Active groups whose name contains `name`, case-insensitively.
    pub async fn fetch_role_groups_by_name(&self, name: &str) -> ServiceResult<Vec<RoleGroupInfo>> {
        let needle = name.trim().to_lowercase();
        let groups = self.store.list_groups().await?;
        let mut views = Vec::new();
        for group in groups
            .into_iter()
            .filter(|g| g.name.to_lowercase().contains(&needle))
        {
            views.push(self.view(group).await?);
        }
        Ok(views)
    }

    async fn view(&self, group: RoleGroup) -> ServiceResult<RoleGroupInfo> {
        let roles = self.store.roles_for_group(group.id).await?;
        Ok(RoleGroupInfo {
            id: group.id,
            name: group.name,
            description: group.description,
            casbin_name: group.casbin_name,
            super_admin: roles.iter().any(Role::is_super_admin),
            role_filters: role_filters_from_roles(&roles),
            role_filter_statuses: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(matches!(validate_name("  "), Err(ServiceError::BadRequest(_))));
        assert!(matches!(validate_name("a,b"), Err(ServiceError::BadRequest(_))));
        assert_eq!(validate_name(" ops ").expect("name"), "ops");
    }
}
