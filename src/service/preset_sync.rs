//! Preset roles: declared-preset sync, custom default roles, and the mirror.
//!
//! # Purpose
//! - Reconciles the declared presets in `default_rbac_role_data` with the
//!   live template tables at startup.
//! - Creates and updates custom preset roles, propagating policy diffs to
//!   every role already rendered from the preset.
//! - Re-asserts the store/engine mirror: a `g` edge for every active mapping
//!   and the preset `p` tuples for every role.
//!
//! # Ordering
//! Template writes sync the preset cache before anything renders from it.
//! Diff propagation reloads the engine before and after the batch.
use super::resolver::RoleResolver;
use super::{ActingUser, ServiceError, ServiceResult, forbidden};
use crate::auth::rbac::cache::RbacDataCache;
use crate::auth::rbac::catalog::{builtin_presets, custom_role_templates, terminal_exec_triple};
use crate::auth::rbac::enforcer::{EngineError, PolicyEngine};
use crate::auth::rbac::template::{diff_res_act_obj_sets, pval_update_map, render_res_act_objs};
use crate::model::{
    DefaultRbacRoleData, ENTITY_APPS, Policy, PolicyCacheDetailObj, RbacPolicyData,
    RbacPolicyResource, RbacRoleData, RbacRoleDto, ResActObj, RoleCacheDetailObj,
};
use crate::store::{AuthStore, PresetRepo, StoreResult};
use std::sync::Arc;
use tokio::sync::oneshot;

const TRIGGER_ROLE: &str = "trigger";

/// Write a declared preset into the live template tables.
pub async fn save_declared(
    store: &dyn PresetRepo,
    preset: &DefaultRbacRoleData,
    actor: i32,
) -> StoreResult<(RbacRoleData, RbacPolicyData)> {
    store
        .save_preset(
            RbacRoleData {
                id: 0,
                entity: preset.entity.clone(),
                access_type: preset.access_type.clone(),
                role: preset.role.clone(),
                role_display_name: preset.role_display_name.clone(),
                role_description: preset.role_description.clone(),
                role_data: preset.role_data.clone(),
                is_preset_role: true,
                deleted: false,
            },
            RbacPolicyData {
                id: 0,
                entity: preset.entity.clone(),
                access_type: preset.access_type.clone(),
                role: preset.role.clone(),
                policy_data: preset.policy_data.clone(),
                is_preset_role: true,
                deleted: false,
            },
            actor,
        )
        .await
}

/// Counts from a mirror reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
}

/// Re-assert the store/engine mirror.
///
/// # What it does
/// 1. Adds `(g, email, role)` for every active user mapping and
///    `(g, casbinName, role)` for every active group mapping.
/// 2. Adds the preset `p` tuples of every stored role.
/// 3. Drops the edges of inactive groups, in both directions.
///
/// # Errors
/// - Store reads and engine writes.
pub async fn reconcile_mirror(
    store: &dyn AuthStore,
    engine: &dyn PolicyEngine,
    resolver: &RoleResolver,
) -> ServiceResult<ReconcileReport> {
    let mut add: Vec<Policy> = Vec::new();
    for (email, role) in store.list_active_user_role_pairs().await? {
        add.push(Policy::grouping(email, role));
    }
    for (casbin_name, role) in store.list_active_group_role_pairs().await? {
        add.push(Policy::grouping(casbin_name, role));
    }
    for role in store.list_roles().await? {
        add.extend(resolver.policies_for_role(&role));
    }
    let added = engine.add_policies(&add).await.map_err(anyhow::Error::from)?;

    let mut remove: Vec<Policy> = Vec::new();
    for casbin_name in store.inactive_group_casbin_names().await? {
        for member in engine.users_for_role(&casbin_name).await {
            remove.push(Policy::grouping(member, &casbin_name));
        }
        for role in engine.roles_for_user(&casbin_name).await {
            remove.push(Policy::grouping(&casbin_name, role));
        }
    }
    let removed = engine
        .remove_policies(&remove)
        .await
        .map_err(anyhow::Error::from)?;
    tracing::info!(added, removed, "policy mirror reconciled");
    Ok(ReconcileReport { added, removed })
}

/// Builtin and custom preset roles.
#[derive(Clone)]
pub struct PresetService {
    store: Arc<dyn AuthStore>,
    engine: Arc<dyn PolicyEngine>,
    cache: Arc<RbacDataCache>,
}

impl PresetService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        engine: Arc<dyn PolicyEngine>,
        cache: Arc<RbacDataCache>,
    ) -> Self {
        Self {
            store,
            engine,
            cache,
        }
    }

    /// Reconcile declared presets with the live tables.
    ///
    /// # What it does
    /// Seeds the builtin declarations, then per declared preset: creates the
    /// live preset when missing, updates it (propagating the policy diff) when
    /// it differs, and marks it deleted when the declaration is disabled.
    /// Syncs the cache when anything was written. Returns the write count.
    pub async fn sync_declared_presets(&self) -> ServiceResult<usize> {
        let seeded = self.store.seed_declared_presets(&builtin_presets()).await?;
        if seeded > 0 {
            tracing::info!(seeded, "declared presets seeded");
        }
        let mut writes = 0;
        for declared in self.store.list_declared_presets().await? {
            let live_role = self
                .store
                .get_role_data(&declared.entity, &declared.access_type, &declared.role)
                .await?;
            let live_policy = self
                .store
                .get_policy_data(&declared.entity, &declared.access_type, &declared.role)
                .await?;
            match (declared.enabled, live_role, live_policy) {
                (false, Some(_), _) | (false, _, Some(_)) => {
                    self.store
                        .mark_preset_deleted(
                            &declared.entity,
                            &declared.access_type,
                            &declared.role,
                            super::SYSTEM_USER_ID,
                        )
                        .await?;
                    writes += 1;
                }
                (false, None, None) => {}
                (true, Some(role), Some(policy)) => {
                    let unchanged = role.role_data == declared.role_data
                        && policy.policy_data == declared.policy_data
                        && role.role_display_name == declared.role_display_name
                        && role.role_description == declared.role_description;
                    if unchanged {
                        continue;
                    }
                    save_declared(self.store.as_ref(), &declared, super::SYSTEM_USER_ID).await?;
                    self.cache.sync().await?;
                    self.propagate_policy_diff(
                        &declared.entity,
                        &declared.access_type,
                        &declared.role,
                        &policy.policy_data.res_act_obj_set,
                        &declared.policy_data.res_act_obj_set,
                    )
                    .await?;
                    writes += 1;
                }
                (true, _, _) => {
                    save_declared(self.store.as_ref(), &declared, super::SYSTEM_USER_ID).await?;
                    writes += 1;
                }
            }
        }
        if writes > 0 {
            self.cache.sync().await?;
        }
        tracing::info!(writes, "declared presets synced");
        Ok(writes)
    }

    /// Run the declared-preset sync on a background task.
    pub fn spawn_sync(self: &Arc<Self>) -> oneshot::Receiver<ServiceResult<usize>> {
        let (tx, rx) = oneshot::channel();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.sync_declared_presets().await;
            if let Err(err) = &result {
                tracing::error!(error = %err, "declared preset sync failed");
            }
            let _ = tx.send(result);
        });
        rx
    }

    /// Create a custom preset role.
    ///
    /// # Errors
    /// - `Forbidden` for non-super-admin actors.
    /// - `BadRequest` for an invalid definition.
    /// - `Conflict` when a live preset already has this key.
    pub async fn create_default_role(
        &self,
        dto: RbacRoleDto,
        actor: &ActingUser,
    ) -> ServiceResult<RbacRoleDto> {
        if !actor.super_admin {
            return Err(forbidden());
        }
        let (role_data, policy_data) = custom_role_templates(&dto)?;
        let name = dto.role_name.trim().to_string();
        if self
            .store
            .get_role_data(&dto.entity, &dto.access_type, &name)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!("role {name} already exists")));
        }
        let (role, policy) = self
            .store
            .save_preset(
                self.role_row(&dto, &name, role_data),
                self.policy_row(&dto, &name, policy_data),
                actor.id,
            )
            .await?;
        self.cache.sync().await?;
        tracing::info!(role = %name, entity = %dto.entity, "custom preset role created");
        Ok(to_dto(&role, &policy))
    }

    /// Update a custom preset role; optionally push the policy diff to every
    /// role rendered from it.
    ///
    /// # Errors
    /// - `Forbidden` for non-super-admin actors.
    /// - `NotFound` for an unknown id.
    /// - `BadRequest` when the definition is invalid or renames the preset.
    pub async fn update_default_role(
        &self,
        dto: RbacRoleDto,
        actor: &ActingUser,
    ) -> ServiceResult<RbacRoleDto> {
        if !actor.super_admin {
            return Err(forbidden());
        }
        let existing = self.store.get_role_data_by_id(dto.id).await?;
        let name = dto.role_name.trim().to_string();
        if existing.entity != dto.entity
            || existing.access_type != dto.access_type
            || existing.role != name
        {
            return Err(ServiceError::BadRequest(
                "entity, access type, and role name cannot be changed".to_string(),
            ));
        }
        let (role_data, policy_data) = custom_role_templates(&dto)?;
        let old_set = self
            .store
            .get_policy_data(&existing.entity, &existing.access_type, &existing.role)
            .await?
            .map(|p| p.policy_data.res_act_obj_set)
            .unwrap_or_default();
        let new_set = policy_data.res_act_obj_set.clone();
        let (role, policy) = self
            .store
            .save_preset(
                self.role_row(&dto, &name, role_data),
                self.policy_row(&dto, &name, policy_data),
                actor.id,
            )
            .await?;
        self.cache.sync().await?;
        if dto.update_policies_for_existing_provided_roles {
            self.propagate_policy_diff(&dto.entity, &dto.access_type, &name, &old_set, &new_set)
                .await?;
        }
        tracing::info!(role = %name, "custom preset role updated");
        Ok(to_dto(&role, &policy))
    }

    pub async fn get_all_default_roles(&self) -> ServiceResult<Vec<RbacRoleDto>> {
        let policies = self.store.list_policy_data().await?;
        Ok(self
            .store
            .list_role_data()
            .await?
            .iter()
            .filter_map(|role| {
                let policy = policies.iter().find(|p| {
                    p.entity == role.entity
                        && p.access_type == role.access_type
                        && p.role == role.role
                })?;
                Some(to_dto(role, policy))
            })
            .collect())
    }

    pub async fn get_default_role(&self, id: i32) -> ServiceResult<RbacRoleDto> {
        let role = self.store.get_role_data_by_id(id).await?;
        let policy = self
            .store
            .get_policy_data(&role.entity, &role.access_type, &role.role)
            .await?
            .ok_or_else(|| ServiceError::NotFound("policy data".to_string()))?;
        Ok(to_dto(&role, &policy))
    }

    /// Add terminal exec to the app trigger preset and to every trigger role.
    ///
    /// Returns `false` when the preset already carried it.
    pub async fn update_trigger_policy_for_terminal_access(
        &self,
        actor: &ActingUser,
    ) -> ServiceResult<bool> {
        if !actor.super_admin {
            return Err(forbidden());
        }
        let mut policy = self
            .store
            .get_policy_data(ENTITY_APPS, "", TRIGGER_ROLE)
            .await?
            .ok_or_else(|| ServiceError::NotFound("trigger preset".to_string()))?;
        let role = self
            .store
            .get_role_data(ENTITY_APPS, "", TRIGGER_ROLE)
            .await?
            .ok_or_else(|| ServiceError::NotFound("trigger preset".to_string()))?;
        let terminal = terminal_exec_triple();
        if policy.policy_data.res_act_obj_set.contains(&terminal) {
            return Ok(false);
        }
        let old_set = policy.policy_data.res_act_obj_set.clone();
        policy.policy_data.res_act_obj_set.push(terminal);
        let new_set = policy.policy_data.res_act_obj_set.clone();
        self.store.save_preset(role, policy, actor.id).await?;
        self.cache.sync().await?;
        self.propagate_policy_diff(ENTITY_APPS, "", TRIGGER_ROLE, &old_set, &new_set)
            .await?;
        Ok(true)
    }

    /// Push the added and removed triples to every role rendered from the
    /// preset `(entity, access_type, role)`.
    ///
    /// # What it does
    /// Each affected role renders both sets against its own scope; the engine
    /// is reloaded, the batch applied, then reloaded again. Returns the
    /// `(added, removed)` tuple counts.
    pub async fn propagate_policy_diff(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
        old: &[ResActObj],
        new: &[ResActObj],
    ) -> ServiceResult<(usize, usize)> {
        let (added, removed) = diff_res_act_obj_sets(old, new);
        if added.is_empty() && removed.is_empty() {
            return Ok((0, 0));
        }
        let roles = self
            .store
            .roles_by_entity_access_type_and_action(entity, access_type, role)
            .await?;
        let mut adds = Vec::new();
        let mut removes = Vec::new();
        for stored in &roles {
            let values = pval_update_map(&stored.scope());
            adds.extend(render_res_act_objs(&stored.role, &added, &values));
            removes.extend(render_res_act_objs(&stored.role, &removed, &values));
        }
        let engine_err = |err: EngineError| ServiceError::Internal(anyhow::Error::from(err));
        self.engine.load_policy().await.map_err(engine_err)?;
        let added_count = self.engine.add_policies(&adds).await.map_err(engine_err)?;
        let removed_count = self
            .engine
            .remove_policies(&removes)
            .await
            .map_err(engine_err)?;
        self.engine.load_policy().await.map_err(engine_err)?;
        tracing::info!(
            entity,
            access_type,
            role,
            roles = roles.len(),
            added = added_count,
            removed = removed_count,
            "preset policy diff propagated"
        );
        Ok((added_count, removed_count))
    }

    fn role_row(&self, dto: &RbacRoleDto, name: &str, data: RoleCacheDetailObj) -> RbacRoleData {
        RbacRoleData {
            id: dto.id,
            entity: dto.entity.clone(),
            access_type: dto.access_type.clone(),
            role: name.to_string(),
            role_display_name: if dto.role_display_name.trim().is_empty() {
                name.to_string()
            } else {
                dto.role_display_name.trim().to_string()
            },
            role_description: dto.role_description.trim().to_string(),
            role_data: data,
            is_preset_role: false,
            deleted: false,
        }
    }

    fn policy_row(
        &self,
        dto: &RbacRoleDto,
        name: &str,
        data: PolicyCacheDetailObj,
    ) -> RbacPolicyData {
        RbacPolicyData {
            id: dto.id,
            entity: dto.entity.clone(),
            access_type: dto.access_type.clone(),
            role: name.to_string(),
            policy_data: data,
            is_preset_role: false,
            deleted: false,
        }
    }
}

/// Rebuild the API shape from stored templates: one resource entry per
/// distinct `res`, listing its actions in template order.
fn to_dto(role: &RbacRoleData, policy: &RbacPolicyData) -> RbacRoleDto {
    let mut resources: Vec<RbacPolicyResource> = Vec::new();
    for item in &policy.policy_data.res_act_obj_set {
        let resource = item.res.value.clone();
        let action = item.act.value.clone();
        match resources.iter_mut().find(|r| r.resource == resource) {
            Some(entry) => {
                if !entry.actions.contains(&action) {
                    entry.actions.push(action);
                }
            }
            None => resources.push(RbacPolicyResource {
                resource,
                actions: vec![action],
            }),
        }
    }
    RbacRoleDto {
        id: role.id,
        role_name: role.role.clone(),
        role_display_name: role.role_display_name.clone(),
        role_description: role.role_description.clone(),
        entity: role.entity.clone(),
        access_type: role.access_type.clone(),
        resource_detail_list: resources,
        update_policies_for_existing_provided_roles: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rbac::enforcer::Enforcer;
    use crate::config::EnforcerConfig;
    use crate::model::{RoleFilter, UserType};
    use crate::store::memory::InMemoryStore;
    use crate::store::{UserRepo, UserUpsert};

    struct Fixture {
        store: Arc<InMemoryStore>,
        engine: Arc<Enforcer>,
        resolver: RoleResolver,
        presets: PresetService,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(
            Enforcer::new(store.clone(), &EnforcerConfig::default())
                .await
                .expect("engine"),
        );
        let cache = Arc::new(RbacDataCache::new(store.clone()));
        let presets = PresetService::new(store.clone(), engine.clone(), cache.clone());
        presets.sync_declared_presets().await.expect("sync");
        Fixture {
            resolver: RoleResolver::new(store.clone(), cache),
            store,
            engine,
            presets,
        }
    }

    async fn grant(fx: &Fixture, email: &str, filter: RoleFilter) {
        let grants = fx.resolver.resolve(&[filter]).await.expect("resolve");
        let outcome = fx
            .store
            .save_user_with_grants(
                UserUpsert {
                    id: None,
                    email: email.to_string(),
                    user_type: UserType::Human,
                    access_token: None,
                },
                &grants.plan(Vec::new()),
                1,
            )
            .await
            .expect("save");
        let mut add = grants.policies.clone();
        add.extend(
            outcome
                .granted
                .iter()
                .map(|r| Policy::grouping(email, &r.role)),
        );
        fx.engine.add_policies(&add).await.expect("add");
    }

    fn trigger_filter(team: &str) -> RoleFilter {
        RoleFilter {
            team: team.to_string(),
            environment: "E".to_string(),
            entity_name: "A".to_string(),
            action: TRIGGER_ROLE.to_string(),
            ..RoleFilter::default()
        }
    }

    #[tokio::test]
    async fn startup_sync_is_idempotent() {
        let fx = fixture().await;
        assert_eq!(fx.presets.sync_declared_presets().await.expect("again"), 0);
        assert_eq!(
            fx.presets.get_all_default_roles().await.expect("list").len(),
            builtin_presets().len()
        );
    }

    #[tokio::test]
    async fn terminal_access_reaches_existing_trigger_roles() {
        let fx = fixture().await;
        grant(&fx, "alice@x", trigger_filter("T")).await;
        grant(&fx, "bob@x", trigger_filter("U")).await;
        assert!(!fx.engine.enforce("alice@x", "terminal", "exec", "T/E/A").await);

        let changed = fx
            .presets
            .update_trigger_policy_for_terminal_access(&ActingUser::system())
            .await
            .expect("update");
        assert!(changed);
        assert!(fx.engine.enforce("alice@x", "terminal", "exec", "T/E/A").await);
        assert!(fx.engine.enforce("bob@x", "terminal", "exec", "U/E/A").await);
        assert!(!fx.engine.enforce("bob@x", "terminal", "exec", "T/E/A").await);

        let again = fx
            .presets
            .update_trigger_policy_for_terminal_access(&ActingUser::system())
            .await
            .expect("again");
        assert!(!again);
    }

    #[tokio::test]
    async fn diff_propagation_counts_adds_and_removes_per_role() {
        let fx = fixture().await;
        grant(&fx, "alice@x", trigger_filter("T")).await;
        let old = fx
            .store
            .get_policy_data(ENTITY_APPS, "", TRIGGER_ROLE)
            .await
            .expect("read")
            .expect("policy")
            .policy_data
            .res_act_obj_set;
        let mut new = old.clone();
        new.remove(0);
        new.push(terminal_exec_triple());
        let counts = fx
            .presets
            .propagate_policy_diff(ENTITY_APPS, "", TRIGGER_ROLE, &old, &new)
            .await
            .expect("diff");
        assert_eq!(counts, (1, 1));
        assert!(!fx.engine.enforce("alice@x", "applications", "get", "T/A").await);
    }

    #[tokio::test]
    async fn custom_roles_require_super_admin_and_unique_names() {
        let fx = fixture().await;
        let dto = RbacRoleDto {
            role_name: "deployer".to_string(),
            entity: ENTITY_APPS.to_string(),
            resource_detail_list: vec![RbacPolicyResource {
                resource: "applications".to_string(),
                actions: vec!["get".to_string(), "trigger".to_string()],
            }],
            ..RbacRoleDto::default()
        };
        let outsider = ActingUser {
            id: 9,
            email: "eve@x".to_string(),
            super_admin: false,
        };
        assert!(matches!(
            fx.presets.create_default_role(dto.clone(), &outsider).await,
            Err(ServiceError::Forbidden(_))
        ));
        let created = fx
            .presets
            .create_default_role(dto.clone(), &ActingUser::system())
            .await
            .expect("create");
        assert_eq!(created.resource_detail_list[0].actions, vec!["get", "trigger"]);
        assert!(matches!(
            fx.presets.create_default_role(dto, &ActingUser::system()).await,
            Err(ServiceError::Conflict(_))
        ));

        let grants = fx
            .resolver
            .resolve(&[RoleFilter {
                team: "T".to_string(),
                action: "deployer".to_string(),
                ..RoleFilter::default()
            }])
            .await
            .expect("resolve");
        assert_eq!(grants.role_names, vec!["apps:deployer_T__".to_string()]);
    }

    #[tokio::test]
    async fn reconcile_restores_missing_edges() {
        let fx = fixture().await;
        grant(&fx, "alice@x", trigger_filter("T")).await;
        fx.engine
            .remove_policies(&[Policy::grouping("alice@x", "role:trigger_T_E_A")])
            .await
            .expect("remove");
        assert!(!fx.engine.enforce("alice@x", "applications", "trigger", "T/A").await);
        let report = reconcile_mirror(fx.store.as_ref(), fx.engine.as_ref(), &fx.resolver)
            .await
            .expect("reconcile");
        assert_eq!(report.added, 1);
        assert!(fx.engine.enforce("alice@x", "applications", "trigger", "T/A").await);
    }
}
