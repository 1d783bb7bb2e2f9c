//! Role resolver: turns grant requests into stored role names.
//!
//! # Purpose
//! Normalizes `RoleFilter` requests, expands their comma-separated fields into
//! single-valued selectors, and finds the stored role for each selector. A
//! selector with no stored role is rendered from the preset template keyed by
//! `(entity, accessType, action)` into a new role plus its `p` tuples.
//!
//! # Key invariants
//! - The resolver never writes. It returns a [`ResolvedGrants`] that the
//!   caller applies in one store transaction before touching the engine.
//! - Selectors are processed in input order; a role name appears once.
//! - A filter that cannot be resolved is reported in `statuses` and skipped
//!   without failing the request.
use super::ServiceResult;
use crate::auth::rbac::cache::RbacDataCache;
use crate::auth::rbac::catalog::super_admin_policy;
use crate::auth::rbac::template::{pval_update_map, render_policies, render_role};
use crate::model::{
    ACCESS_TYPE_DEVTRON_APP, ACTION_SUPER_ADMIN, ACTION_UPDATE, EMPTY_SENTINEL, ENTITY_APPS,
    Policy, Role, RoleFilter, RoleFilterStatus, SUPER_ADMIN_ROLE,
};
use crate::store::{AuthStore, GrantPlan};
use std::collections::HashSet;
use std::sync::Arc;

/// Roles and tuples a set of filters resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGrants {
    /// Rows to insert before mapping (rendered from presets).
    pub new_roles: Vec<Role>,
    /// Every resolved role name, existing or new, in request order.
    pub role_names: Vec<String>,
    /// `p` tuples of the new roles.
    pub policies: Vec<Policy>,
    pub statuses: Vec<RoleFilterStatus>,
}

impl ResolvedGrants {
    /// Grants for the super-admin singleton. Inserting the role is a no-op
    /// when it already exists.
    pub fn super_admin() -> Self {
        Self {
            new_roles: vec![super_admin_role()],
            role_names: vec![SUPER_ADMIN_ROLE.to_string()],
            policies: vec![super_admin_policy()],
            statuses: Vec::new(),
        }
    }

    fn push_name(&mut self, name: String) {
        if !self.role_names.contains(&name) {
            self.role_names.push(name);
        }
    }

    /// Store plan granting every resolved role and revoking `revoke`.
    pub fn plan(&self, revoke: Vec<i32>) -> GrantPlan {
        GrantPlan {
            new_roles: self.new_roles.clone(),
            grant: self.role_names.clone(),
            revoke,
        }
    }
}

fn super_admin_role() -> Role {
    Role {
        role: SUPER_ADMIN_ROLE.to_string(),
        action: ACTION_SUPER_ADMIN.to_string(),
        ..Role::default()
    }
}

fn clean(value: &str) -> String {
    let value = value.trim();
    if value == EMPTY_SENTINEL {
        String::new()
    } else {
        value.to_string()
    }
}

/// Split a comma-separated field; blank and `NONE` tokens become `""`.
///
/// Order of first appearance is kept and duplicates are dropped. An empty
/// field yields a single `""`.
pub fn split_csv(raw: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for token in raw.split(',') {
        let value = clean(token);
        if !values.contains(&value) {
            values.push(value);
        }
    }
    values
}

/// Trim every field and apply the entity and access-type aliases.
///
/// Comma-separated fields are trimmed but not split.
pub fn normalize_filter(filter: &RoleFilter) -> RoleFilter {
    let csv = |raw: &str| {
        raw.split(',')
            .map(clean)
            .collect::<Vec<_>>()
            .join(",")
    };
    let mut out = RoleFilter {
        entity: clean(&filter.entity),
        team: clean(&filter.team),
        entity_name: csv(&filter.entity_name),
        environment: csv(&filter.environment),
        action: clean(&filter.action),
        access_type: clean(&filter.access_type),
        cluster: clean(&filter.cluster),
        namespace: csv(&filter.namespace),
        group: csv(&filter.group),
        kind: csv(&filter.kind),
        resource: csv(&filter.resource),
    };
    if out.access_type == ACCESS_TYPE_DEVTRON_APP {
        out.access_type = String::new();
    }
    if out.entity.is_empty() && !out.team.is_empty() {
        out.entity = ENTITY_APPS.to_string();
    }
    out
}

/// Why a normalized filter cannot name any role, if it cannot.
fn shape_problem(filter: &RoleFilter) -> Option<&'static str> {
    if filter.is_super_admin() {
        return None;
    }
    if filter.action.is_empty() {
        return Some("role filter has no action");
    }
    if filter.is_cluster() {
        return filter
            .cluster
            .is_empty()
            .then_some("cluster role filter has no cluster");
    }
    if filter.entity == ENTITY_APPS {
        return filter
            .team
            .is_empty()
            .then_some("app role filter has no team");
    }
    if filter.entity.is_empty() {
        return Some("role filter needs a team and action, an entity, or a cluster");
    }
    if filter.action == ACTION_UPDATE
        && split_csv(&filter.entity_name).iter().any(String::is_empty)
    {
        return Some("update filter needs an entityName");
    }
    None
}

/// Expand a normalized filter into single-valued selectors.
///
/// Cluster filters expand `namespace x group x kind x resource`; every other
/// filter expands `environment x entityName`.
pub fn expand_filter(filter: &RoleFilter) -> Vec<RoleFilter> {
    if filter.is_super_admin() {
        return vec![RoleFilter {
            action: ACTION_SUPER_ADMIN.to_string(),
            ..RoleFilter::default()
        }];
    }
    let mut selectors = Vec::new();
    if filter.is_cluster() {
        for namespace in split_csv(&filter.namespace) {
            for group in split_csv(&filter.group) {
                for kind in split_csv(&filter.kind) {
                    for resource in split_csv(&filter.resource) {
                        selectors.push(RoleFilter {
                            namespace: namespace.clone(),
                            group: group.clone(),
                            kind: kind.clone(),
                            resource,
                            entity_name: String::new(),
                            environment: String::new(),
                            team: String::new(),
                            ..filter.clone()
                        });
                    }
                }
            }
        }
        return selectors;
    }
    for environment in split_csv(&filter.environment) {
        for entity_name in split_csv(&filter.entity_name) {
            selectors.push(RoleFilter {
                environment: environment.clone(),
                entity_name,
                ..filter.clone()
            });
        }
    }
    selectors
}

/// Resolves filters against the store and the preset template cache.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn AuthStore>,
    cache: Arc<RbacDataCache>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn AuthStore>, cache: Arc<RbacDataCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<RbacDataCache> {
        &self.cache
    }

    /// Resolve every filter.
    ///
    /// # What it does
    /// For each normalized filter and each selector it expands to:
    /// 1. look up the stored role;
    /// 2. otherwise render role and policies from the preset template;
    /// 3. otherwise record a status for the filter and move on.
    ///
    /// # Errors
    /// - Store read failures.
    pub async fn resolve(&self, filters: &[RoleFilter]) -> ServiceResult<ResolvedGrants> {
        let mut out = ResolvedGrants::default();
        let mut seen_filters = HashSet::new();
        for raw in filters {
            let filter = normalize_filter(raw);
            if !seen_filters.insert(filter.merge_key()) {
                continue;
            }
            if let Some(problem) = shape_problem(&filter) {
                tracing::debug!(filter = ?filter, problem, "dropping role filter");
                out.statuses.push(RoleFilterStatus {
                    filter: raw.clone(),
                    status: problem.to_string(),
                });
                continue;
            }
            for selector in expand_filter(&filter) {
                if let Err(problem) = self.resolve_selector(&selector, &mut out).await? {
                    out.statuses.push(RoleFilterStatus {
                        filter: raw.clone(),
                        status: problem,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Outer `Err` is a store failure; inner `Err` a per-selector problem.
    async fn resolve_selector(
        &self,
        selector: &RoleFilter,
        out: &mut ResolvedGrants,
    ) -> ServiceResult<Result<(), String>> {
        if selector.is_super_admin() {
            let grants = ResolvedGrants::super_admin();
            if self.store.get_role_by_filter(selector).await?.is_none() {
                out.new_roles.extend(grants.new_roles);
                out.policies.extend(grants.policies);
            }
            out.push_name(SUPER_ADMIN_ROLE.to_string());
            return Ok(Ok(()));
        }
        if let Some(role) = self.store.get_role_by_filter(selector).await? {
            out.push_name(role.role);
            return Ok(Ok(()));
        }
        let Some((role_template, policy_template)) = self.cache.get_default_role_and_policy(
            &selector.entity,
            &selector.access_type,
            &selector.action,
        ) else {
            return Ok(Err(format!(
                "no preset role for entity '{}', access type '{}', action '{}'",
                selector.entity, selector.access_type, selector.action
            )));
        };
        let values = pval_update_map(selector);
        let role = render_role(&role_template, &values);
        if role.role.is_empty() {
            return Ok(Err("preset rendered an empty role name".to_string()));
        }
        if !out.new_roles.iter().any(|r| r.role == role.role) {
            out.policies
                .extend(render_policies(&policy_template, &values));
            out.new_roles.push(role.clone());
        }
        out.push_name(role.role);
        Ok(Ok(()))
    }

    /// `p` tuples a stored role should carry according to its preset, or the
    /// super-admin tuple for the singleton. Empty when no preset applies.
    pub fn policies_for_role(&self, role: &Role) -> Vec<Policy> {
        if role.is_super_admin() {
            return vec![super_admin_policy()];
        }
        let scope = role.scope();
        match self
            .cache
            .policy_template(&role.entity, &role.access_type, &role.action)
        {
            Some(template) => render_policies(&template, &pval_update_map(&scope)),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rbac::catalog::builtin_presets;
    use crate::model::{ENTITY_CHART_GROUP, ENTITY_CLUSTER};
    use crate::store::PresetRepo;
    use crate::store::memory::InMemoryStore;
    use crate::store::{UserRepo, UserUpsert};
    use crate::model::UserType;

    async fn resolver() -> (RoleResolver, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .seed_declared_presets(&builtin_presets())
            .await
            .expect("seed");
        for preset in store.list_declared_presets().await.expect("declared") {
            crate::service::preset_sync::save_declared(store.as_ref(), &preset, 1)
                .await
                .expect("save");
        }
        let cache = Arc::new(RbacDataCache::new(store.clone()));
        cache.sync().await.expect("sync");
        (RoleResolver::new(store.clone(), cache), store)
    }

    fn app_filter(team: &str, env: &str, app: &str, action: &str) -> RoleFilter {
        RoleFilter {
            team: team.to_string(),
            environment: env.to_string(),
            entity_name: app.to_string(),
            action: action.to_string(),
            ..RoleFilter::default()
        }
    }

    #[test]
    fn csv_split_keeps_order_and_maps_none() {
        assert_eq!(split_csv("b, a ,NONE,b"), vec!["b", "a", ""]);
        assert_eq!(split_csv(""), vec![""]);
    }

    #[test]
    fn normalize_applies_aliases() {
        let mut filter = app_filter(" T ", "E", "A", "view");
        filter.access_type = ACCESS_TYPE_DEVTRON_APP.to_string();
        let normalized = normalize_filter(&filter);
        assert_eq!(normalized.entity, ENTITY_APPS);
        assert_eq!(normalized.team, "T");
        assert_eq!(normalized.access_type, "");
    }

    #[test]
    fn expand_is_environment_by_app_product() {
        let selectors = expand_filter(&normalize_filter(&app_filter("T", "e1,e2", "a,b", "view")));
        let pairs: Vec<(String, String)> = selectors
            .into_iter()
            .map(|s| (s.environment, s.entity_name))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("e1".into(), "a".into()),
                ("e1".into(), "b".into()),
                ("e2".into(), "a".into()),
                ("e2".into(), "b".into()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_app_role_is_rendered_from_preset() {
        let (resolver, _) = resolver().await;
        let grants = resolver
            .resolve(&[app_filter("T", "E", "A", "admin")])
            .await
            .expect("resolve");
        assert_eq!(grants.role_names, vec!["role:admin_T_E_A".to_string()]);
        assert_eq!(grants.new_roles.len(), 1);
        assert_eq!(grants.policies.len(), 4);
        assert!(grants.statuses.is_empty());
    }

    #[tokio::test]
    async fn stored_role_is_reused() {
        let (resolver, store) = resolver().await;
        let grants = resolver
            .resolve(&[app_filter("T", "E", "A", "view")])
            .await
            .expect("resolve");
        store
            .save_user_with_grants(
                UserUpsert {
                    id: None,
                    email: "x@y".to_string(),
                    user_type: UserType::Human,
                    access_token: None,
                },
                &grants.plan(Vec::new()),
                1,
            )
            .await
            .expect("save");

        let again = resolver
            .resolve(&[app_filter("T", "E", "A", "view")])
            .await
            .expect("resolve");
        assert!(again.new_roles.is_empty());
        assert_eq!(again.role_names, vec!["role:view_T_E_A".to_string()]);
    }

    #[tokio::test]
    async fn malformed_filters_are_reported_not_fatal() {
        let (resolver, _) = resolver().await;
        let grants = resolver
            .resolve(&[
                RoleFilter {
                    action: "view".to_string(),
                    ..RoleFilter::default()
                },
                RoleFilter {
                    entity: ENTITY_CHART_GROUP.to_string(),
                    action: "view".to_string(),
                    ..RoleFilter::default()
                },
                RoleFilter {
                    entity: "widgets".to_string(),
                    action: "view".to_string(),
                    ..RoleFilter::default()
                },
            ])
            .await
            .expect("resolve");
        assert_eq!(grants.role_names, vec!["role:chart-group_view".to_string()]);
        assert_eq!(grants.statuses.len(), 2);
    }

    #[tokio::test]
    async fn update_filter_without_entity_name_grants_nothing() {
        let (resolver, store) = resolver().await;
        let named = RoleFilter {
            entity: ENTITY_CHART_GROUP.to_string(),
            entity_name: "payments".to_string(),
            action: ACTION_UPDATE.to_string(),
            ..RoleFilter::default()
        };
        let grants = resolver.resolve(&[named.clone()]).await.expect("resolve");
        assert!(grants.statuses.is_empty());
        store
            .save_user_with_grants(
                UserUpsert {
                    id: None,
                    email: "owner@y".to_string(),
                    user_type: UserType::Human,
                    access_token: None,
                },
                &grants.plan(Vec::new()),
                1,
            )
            .await
            .expect("save");

        for entity_name in ["", "NONE", "payments,"] {
            let grants = resolver
                .resolve(&[RoleFilter {
                    entity_name: entity_name.to_string(),
                    ..named.clone()
                }])
                .await
                .expect("resolve");
            assert!(grants.role_names.is_empty(), "{entity_name:?}");
            assert!(grants.policies.is_empty());
            assert_eq!(grants.statuses.len(), 1);
            assert_eq!(grants.statuses[0].status, "update filter needs an entityName");
        }
    }

    #[tokio::test]
    async fn super_admin_resolves_to_existing_singleton() {
        let (resolver, _) = resolver().await;
        let grants = resolver
            .resolve(&[RoleFilter {
                action: ACTION_SUPER_ADMIN.to_string(),
                ..RoleFilter::default()
            }])
            .await
            .expect("resolve");
        assert_eq!(grants.role_names, vec![SUPER_ADMIN_ROLE.to_string()]);
        assert!(grants.new_roles.is_empty());
    }

    #[tokio::test]
    async fn cluster_filter_expands_namespaces() {
        let (resolver, _) = resolver().await;
        let grants = resolver
            .resolve(&[RoleFilter {
                entity: ENTITY_CLUSTER.to_string(),
                cluster: "c1".to_string(),
                namespace: "a,b".to_string(),
                action: "view".to_string(),
                ..RoleFilter::default()
            }])
            .await
            .expect("resolve");
        assert_eq!(
            grants.role_names,
            vec![
                "role:cluster_c1_a____view".to_string(),
                "role:cluster_c1_b____view".to_string(),
            ]
        );
        let rendered = resolver.policies_for_role(&grants.new_roles[0]);
        assert_eq!(rendered, grants.policies[..rendered.len()].to_vec());
    }
}
