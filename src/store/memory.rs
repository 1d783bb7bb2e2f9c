//! In-memory implementation of the auth store.
//!
//! # Purpose
//! Implements every repository trait and the policy adapter over plain maps
//! guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - single-process deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - Multi-table writes check every precondition (uniqueness, target rows,
//!   granted role names) under the write lock before touching a table, so a
//!   rejected write leaves nothing behind.
//!
//! # Seed data
//! A fresh store holds the system user (id 1), the `admin` user (id 2), the
//! super-admin role mapped to `admin`, and the matching policy tuples.
use super::{
    AuthStore, GrantOutcome, GrantPlan, GroupRepo, GroupUpsert, PolicyAdapter, PresetRepo,
    RoleRepo, SelfRegistrationRepo, SsoRepo, StoreError, StoreResult, UserRepo, UserUpsert,
};
use crate::observability;
use crate::model::{
    ACTION_SUPER_ADMIN, DefaultRbacRoleData, Policy, RbacPolicyData, RbacRoleData, Role,
    RoleFilter, RoleGroup, SUPER_ADMIN_ROLE, SsoLoginModel, User, UserAudit, UserType,
    role_matches_selector,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type PresetKey = (String, String, String);

fn preset_key(entity: &str, access_type: &str, role: &str) -> PresetKey {
    (entity.to_string(), access_type.to_string(), role.to_string())
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<i32, User>,
    next_user_id: i32,
    roles: BTreeMap<i32, Role>,
    next_role_id: i32,
    /// `(user_id, role_id)`
    user_roles: BTreeSet<(i32, i32)>,
    groups: BTreeMap<i32, RoleGroup>,
    next_group_id: i32,
    /// `(group_id, role_id)`
    group_roles: BTreeSet<(i32, i32)>,
    role_data: BTreeMap<PresetKey, RbacRoleData>,
    policy_data: BTreeMap<PresetKey, RbacPolicyData>,
    next_preset_id: i32,
    declared: BTreeMap<PresetKey, DefaultRbacRoleData>,
    sso: BTreeMap<i32, SsoLoginModel>,
    next_sso_id: i32,
    audits: HashMap<i32, UserAudit>,
    self_registration_roles: BTreeSet<String>,
}

impl Tables {
    fn seeded() -> Self {
        let now = Utc::now();
        let mut tables = Tables {
            next_user_id: 1,
            next_role_id: 1,
            next_group_id: 1,
            next_preset_id: 1,
            next_sso_id: 1,
            ..Tables::default()
        };
        for email in ["system", "admin"] {
            let id = tables.next_user_id;
            tables.next_user_id += 1;
            tables.users.insert(
                id,
                User {
                    id,
                    email: email.to_string(),
                    access_token: None,
                    user_type: UserType::Human,
                    active: true,
                    created_on: now,
                    created_by: 1,
                    updated_on: now,
                    updated_by: 1,
                },
            );
        }
        let role_id = tables.insert_role(Role {
            role: SUPER_ADMIN_ROLE.to_string(),
            action: ACTION_SUPER_ADMIN.to_string(),
            ..Role::default()
        });
        tables.user_roles.insert((2, role_id));
        tables
    }

    fn insert_role(&mut self, mut role: Role) -> i32 {
        if let Some(existing) = self.roles.values().find(|r| r.role == role.role) {
            return existing.id;
        }
        let id = self.next_role_id;
        self.next_role_id += 1;
        role.id = id;
        self.roles.insert(id, role);
        id
    }

    fn role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.role == name)
    }

    fn active_user_by_email(&self, email: &str) -> Option<&User> {
        let email = email.to_lowercase();
        self.users
            .values()
            .find(|u| u.active && u.email.to_lowercase() == email)
    }

    fn active_group_by_name(&self, name: &str) -> Option<&RoleGroup> {
        let name = name.to_lowercase();
        self.groups
            .values()
            .find(|g| g.active && g.name.to_lowercase() == name)
    }

    fn active_group_by_casbin_name(&self, casbin_name: &str) -> Option<&RoleGroup> {
        self.groups
            .values()
            .find(|g| g.active && g.casbin_name == casbin_name)
    }

    /// Every granted name must be a stored role or one the plan creates.
    fn check_plan(&self, plan: &GrantPlan) -> StoreResult<()> {
        for name in &plan.grant {
            let known = self.role_by_name(name).is_some()
                || plan.new_roles.iter().any(|role| &role.role == name);
            if !known {
                return Err(StoreError::NotFound(format!("role {name}")));
            }
        }
        Ok(())
    }

    /// Insert `plan.new_roles`, then apply grants and revocations through
    /// `mappings`, keyed by `subject_id`. Callers run [`Tables::check_plan`]
    /// first.
    fn apply_plan(
        &mut self,
        subject_id: i32,
        plan: &GrantPlan,
        select: fn(&mut Tables) -> &mut BTreeSet<(i32, i32)>,
    ) -> (Vec<Role>, Vec<Role>) {
        for role in &plan.new_roles {
            self.insert_role(role.clone());
        }
        let mut granted = Vec::new();
        for name in &plan.grant {
            if let Some(role) = self.role_by_name(name).cloned() {
                select(self).insert((subject_id, role.id));
                granted.push(role);
            }
        }
        let mut revoked = Vec::new();
        for role_id in &plan.revoke {
            if select(self).remove(&(subject_id, *role_id))
                && let Some(role) = self.roles.get(role_id)
            {
                revoked.push(role.clone());
            }
        }
        (granted, revoked)
    }
}

fn user_roles_of(tables: &mut Tables) -> &mut BTreeSet<(i32, i32)> {
    &mut tables.user_roles
}

fn group_roles_of(tables: &mut Tables) -> &mut BTreeSet<(i32, i32)> {
    &mut tables.group_roles
}

/// In-memory auth store.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    /// Relational tables, swapped as a unit on multi-table writes.
    tables: Arc<RwLock<Tables>>,
    /// Persisted policy tuples backing the policy engine.
    policies: Arc<RwLock<BTreeSet<Policy>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let policies = BTreeSet::from([
            Policy::permission(SUPER_ADMIN_ROLE, "*", "*", "*"),
            Policy::grouping("admin", SUPER_ADMIN_ROLE),
        ]);
        Self {
            tables: Arc::new(RwLock::new(Tables::seeded())),
            policies: Arc::new(RwLock::new(policies)),
        }
    }
}

#[async_trait]
impl UserRepo for InMemoryStore {
    async fn fetch_active_or_deleted_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        if let Some(user) = tables.active_user_by_email(email) {
            return Ok(Some(user.clone()));
        }
        let email = email.to_lowercase();
        Ok(tables
            .users
            .values()
            .rev()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn get_user(&self, id: i32) -> StoreResult<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(&id)
            .filter(|u| u.active)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn get_user_include_deleted(&self, id: i32) -> StoreResult<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn list_active_users(&self) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        let users: Vec<User> = tables.users.values().filter(|u| u.active).cloned().collect();
        metrics::gauge!(observability::USERS_ACTIVE).set(users.len() as f64);
        Ok(users)
    }

    async fn roles_for_user(&self, user_id: i32) -> StoreResult<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_roles
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .filter_map(|(_, rid)| tables.roles.get(rid).cloned())
            .collect())
    }

    async fn save_user_with_grants(
        &self,
        user: UserUpsert,
        plan: &GrantPlan,
        actor: i32,
    ) -> StoreResult<GrantOutcome<User>> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        // Step 1: preconditions, before any table changes.
        if let Some(existing) = tables.active_user_by_email(&user.email)
            && Some(existing.id) != user.id
        {
            return Err(StoreError::Conflict("user exists".into()));
        }
        if let Some(id) = user.id
            && !tables.users.contains_key(&id)
        {
            return Err(StoreError::NotFound("user".into()));
        }
        tables.check_plan(plan)?;

        // Step 2: the user row.
        let saved = match user.id {
            Some(id) => {
                let row = tables
                    .users
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::NotFound("user".into()))?;
                row.email = user.email;
                row.active = true;
                if user.access_token.is_some() {
                    row.access_token = user.access_token;
                }
                row.updated_on = now;
                row.updated_by = actor;
                row.clone()
            }
            None => {
                let id = tables.next_user_id;
                tables.next_user_id += 1;
                let row = User {
                    id,
                    email: user.email,
                    access_token: user.access_token,
                    user_type: user.user_type,
                    active: true,
                    created_on: now,
                    created_by: actor,
                    updated_on: now,
                    updated_by: actor,
                };
                tables.users.insert(id, row.clone());
                row
            }
        };

        // Step 3: roles and mappings.
        let (granted, revoked) = tables.apply_plan(saved.id, plan, user_roles_of);
        Ok(GrantOutcome {
            subject: saved,
            granted,
            revoked,
        })
    }

    async fn deactivate_user(&self, user_id: i32, actor: i32) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .filter(|u| u.active)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        user.active = false;
        user.updated_on = Utc::now();
        user.updated_by = actor;
        let user = user.clone();
        tables.user_roles.retain(|(uid, _)| *uid != user_id);
        Ok(user)
    }

    async fn upsert_user_audit(&self, user_id: i32, client_ip: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        tables
            .audits
            .entry(user_id)
            .and_modify(|audit| {
                audit.client_ip = client_ip.to_string();
                audit.updated_on = now;
            })
            .or_insert_with(|| UserAudit {
                user_id,
                client_ip: client_ip.to_string(),
                created_on: now,
                updated_on: now,
            });
        Ok(())
    }

    async fn get_user_audit(&self, user_id: i32) -> StoreResult<Option<UserAudit>> {
        let tables = self.tables.read().await;
        Ok(tables.audits.get(&user_id).cloned())
    }

    async fn list_active_user_role_pairs(&self) -> StoreResult<Vec<(String, String)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_roles
            .iter()
            .filter_map(|(uid, rid)| {
                let user = tables.users.get(uid).filter(|u| u.active)?;
                let role = tables.roles.get(rid)?;
                Some((user.email.clone(), role.role.clone()))
            })
            .collect())
    }
}

#[async_trait]
impl RoleRepo for InMemoryStore {
    async fn get_role_by_filter(&self, selector: &RoleFilter) -> StoreResult<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles
            .values()
            .find(|role| role_matches_selector(role, selector))
            .cloned())
    }

    async fn get_roles_by_names(&self, names: &[String]) -> StoreResult<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles
            .values()
            .filter(|role| names.contains(&role.role))
            .cloned()
            .collect())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().cloned().collect())
    }

    async fn roles_by_entity_access_type_and_action(
        &self,
        entity: &str,
        access_type: &str,
        action: &str,
    ) -> StoreResult<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles
            .values()
            .filter(|r| r.entity == entity && r.access_type == access_type && r.action == action)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupRepo for InMemoryStore {
    async fn get_group(&self, id: i32) -> StoreResult<RoleGroup> {
        let tables = self.tables.read().await;
        tables
            .groups
            .get(&id)
            .filter(|g| g.active)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("role group".into()))
    }

    async fn get_groups_by_names(&self, names: &[String]) -> StoreResult<Vec<RoleGroup>> {
        let tables = self.tables.read().await;
        Ok(names
            .iter()
            .filter_map(|name| tables.active_group_by_name(name).cloned())
            .collect())
    }

    async fn get_groups_by_casbin_names(&self, names: &[String]) -> StoreResult<Vec<RoleGroup>> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .values()
            .filter(|g| g.active && names.contains(&g.casbin_name))
            .cloned()
            .collect())
    }

    async fn list_groups(&self) -> StoreResult<Vec<RoleGroup>> {
        let tables = self.tables.read().await;
        Ok(tables.groups.values().filter(|g| g.active).cloned().collect())
    }

    async fn roles_for_group(&self, group_id: i32) -> StoreResult<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables
            .group_roles
            .iter()
            .filter(|(gid, _)| *gid == group_id)
            .filter_map(|(_, rid)| tables.roles.get(rid).cloned())
            .collect())
    }

    async fn save_group_with_grants(
        &self,
        group: GroupUpsert,
        plan: &GrantPlan,
        _actor: i32,
    ) -> StoreResult<GrantOutcome<RoleGroup>> {
        let mut tables = self.tables.write().await;

        // Two names that normalise to the same subject would share policy edges.
        let clash = [
            tables.active_group_by_name(&group.name),
            tables.active_group_by_casbin_name(&group.casbin_name),
        ]
        .into_iter()
        .flatten()
        .any(|existing| Some(existing.id) != group.id);
        if clash {
            return Err(StoreError::Conflict("role group exists".into()));
        }
        if let Some(id) = group.id
            && !tables.groups.get(&id).is_some_and(|g| g.active)
        {
            return Err(StoreError::NotFound("role group".into()));
        }
        tables.check_plan(plan)?;

        let saved = match group.id {
            Some(id) => {
                let row = tables
                    .groups
                    .get_mut(&id)
                    .filter(|g| g.active)
                    .ok_or_else(|| StoreError::NotFound("role group".into()))?;
                row.name = group.name;
                row.casbin_name = group.casbin_name;
                row.description = group.description;
                row.clone()
            }
            None => {
                let id = tables.next_group_id;
                tables.next_group_id += 1;
                let row = RoleGroup {
                    id,
                    name: group.name,
                    casbin_name: group.casbin_name,
                    description: group.description,
                    active: true,
                };
                tables.groups.insert(id, row.clone());
                row
            }
        };

        let (granted, revoked) = tables.apply_plan(saved.id, plan, group_roles_of);
        Ok(GrantOutcome {
            subject: saved,
            granted,
            revoked,
        })
    }

    async fn deactivate_group(&self, group_id: i32, _actor: i32) -> StoreResult<RoleGroup> {
        let mut tables = self.tables.write().await;
        let group = tables
            .groups
            .get_mut(&group_id)
            .filter(|g| g.active)
            .ok_or_else(|| StoreError::NotFound("role group".into()))?;
        group.active = false;
        let group = group.clone();
        tables.group_roles.retain(|(gid, _)| *gid != group_id);
        Ok(group)
    }

    async fn inactive_group_casbin_names(&self) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        let active: BTreeSet<&str> = tables
            .groups
            .values()
            .filter(|g| g.active)
            .map(|g| g.casbin_name.as_str())
            .collect();
        let inactive: BTreeSet<String> = tables
            .groups
            .values()
            .filter(|g| !g.active && !active.contains(g.casbin_name.as_str()))
            .map(|g| g.casbin_name.clone())
            .collect();
        Ok(inactive.into_iter().collect())
    }

    async fn list_active_group_role_pairs(&self) -> StoreResult<Vec<(String, String)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .group_roles
            .iter()
            .filter_map(|(gid, rid)| {
                let group = tables.groups.get(gid).filter(|g| g.active)?;
                let role = tables.roles.get(rid)?;
                Some((group.casbin_name.clone(), role.role.clone()))
            })
            .collect())
    }
}

#[async_trait]
impl PresetRepo for InMemoryStore {
    async fn list_role_data(&self) -> StoreResult<Vec<RbacRoleData>> {
        let tables = self.tables.read().await;
        Ok(tables
            .role_data
            .values()
            .filter(|r| !r.deleted)
            .cloned()
            .collect())
    }

    async fn list_policy_data(&self) -> StoreResult<Vec<RbacPolicyData>> {
        let tables = self.tables.read().await;
        Ok(tables
            .policy_data
            .values()
            .filter(|p| !p.deleted)
            .cloned()
            .collect())
    }

    async fn get_role_data(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> StoreResult<Option<RbacRoleData>> {
        let tables = self.tables.read().await;
        Ok(tables
            .role_data
            .get(&preset_key(entity, access_type, role))
            .filter(|r| !r.deleted)
            .cloned())
    }

    async fn get_role_data_by_id(&self, id: i32) -> StoreResult<RbacRoleData> {
        let tables = self.tables.read().await;
        tables
            .role_data
            .values()
            .find(|r| r.id == id && !r.deleted)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("role data".into()))
    }

    async fn get_policy_data(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> StoreResult<Option<RbacPolicyData>> {
        let tables = self.tables.read().await;
        Ok(tables
            .policy_data
            .get(&preset_key(entity, access_type, role))
            .filter(|p| !p.deleted)
            .cloned())
    }

    async fn save_preset(
        &self,
        mut role_data: RbacRoleData,
        mut policy_data: RbacPolicyData,
        _actor: i32,
    ) -> StoreResult<(RbacRoleData, RbacPolicyData)> {
        let mut tables = self.tables.write().await;
        let key = preset_key(&role_data.entity, &role_data.access_type, &role_data.role);
        role_data.deleted = false;
        policy_data.deleted = false;
        role_data.id = match tables.role_data.get(&key) {
            Some(existing) => existing.id,
            None => {
                let id = tables.next_preset_id;
                tables.next_preset_id += 1;
                id
            }
        };
        policy_data.id = tables
            .policy_data
            .get(&key)
            .map(|existing| existing.id)
            .unwrap_or(role_data.id);
        tables.role_data.insert(key.clone(), role_data.clone());
        tables.policy_data.insert(key, policy_data.clone());
        Ok((role_data, policy_data))
    }

    async fn mark_preset_deleted(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
        _actor: i32,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let key = preset_key(entity, access_type, role);
        if let Some(row) = tables.role_data.get_mut(&key) {
            row.deleted = true;
        }
        if let Some(row) = tables.policy_data.get_mut(&key) {
            row.deleted = true;
        }
        Ok(())
    }

    async fn list_declared_presets(&self) -> StoreResult<Vec<DefaultRbacRoleData>> {
        let tables = self.tables.read().await;
        Ok(tables.declared.values().cloned().collect())
    }

    async fn seed_declared_presets(&self, presets: &[DefaultRbacRoleData]) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for preset in presets {
            let key = preset_key(&preset.entity, &preset.access_type, &preset.role);
            if tables.declared.contains_key(&key) {
                continue;
            }
            let mut preset = preset.clone();
            preset.id = tables.declared.len() as i32 + 1;
            tables.declared.insert(key, preset);
            inserted += 1;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl SsoRepo for InMemoryStore {
    async fn list_sso(&self) -> StoreResult<Vec<SsoLoginModel>> {
        let tables = self.tables.read().await;
        Ok(tables.sso.values().cloned().collect())
    }

    async fn get_sso(&self, id: i32) -> StoreResult<SsoLoginModel> {
        let tables = self.tables.read().await;
        tables
            .sso
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("sso config".into()))
    }

    async fn get_sso_by_name(&self, name: &str) -> StoreResult<Option<SsoLoginModel>> {
        let tables = self.tables.read().await;
        Ok(tables.sso.values().find(|s| s.name == name).cloned())
    }

    async fn active_sso(&self) -> StoreResult<Option<SsoLoginModel>> {
        let tables = self.tables.read().await;
        Ok(tables.sso.values().find(|s| s.active).cloned())
    }

    async fn save_sso(&self, mut model: SsoLoginModel, _actor: i32) -> StoreResult<SsoLoginModel> {
        let mut tables = self.tables.write().await;
        if tables
            .sso
            .values()
            .any(|s| s.name == model.name && s.id != model.id)
        {
            return Err(StoreError::Conflict("sso config exists".into()));
        }
        if model.id == 0 {
            model.id = tables.next_sso_id;
            tables.next_sso_id += 1;
        } else if !tables.sso.contains_key(&model.id) {
            return Err(StoreError::NotFound("sso config".into()));
        }
        if model.active {
            for other in tables.sso.values_mut() {
                other.active = false;
            }
        }
        tables.sso.insert(model.id, model.clone());
        Ok(model)
    }
}

#[async_trait]
impl SelfRegistrationRepo for InMemoryStore {
    async fn self_registration_roles(&self) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables.self_registration_roles.iter().cloned().collect())
    }

    async fn set_self_registration_roles(&self, roles: &[String], _actor: i32) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.self_registration_roles = roles.iter().cloned().collect();
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for InMemoryStore {
    async fn load_policy_rules(&self) -> StoreResult<Vec<Policy>> {
        let policies = self.policies.read().await;
        Ok(policies.iter().cloned().collect())
    }

    async fn save_policy_rules(&self, policies: &[Policy]) -> StoreResult<()> {
        let mut stored = self.policies.write().await;
        stored.extend(policies.iter().cloned());
        Ok(())
    }

    async fn remove_policy_rules(&self, policies: &[Policy]) -> StoreResult<()> {
        let mut stored = self.policies.write().await;
        for policy in policies {
            stored.remove(policy);
        }
        Ok(())
    }
}

#[async_trait]
impl AuthStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
