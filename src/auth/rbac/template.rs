//! Preset template rendering and policy diffs.
//!
//! # Purpose
//! Turns preset templates (`RoleCacheDetailObj`, `PolicyCacheDetailObj`) into
//! concrete roles and policy tuples for one scope, and computes the added and
//! removed `(res, act, obj)` triples between two versions of a preset.
//!
//! # Key invariants
//! - Only `%` bytes listed in a leaf's `indexKeyMap` are substituted; any other
//!   byte, including an unlisted `%`, is copied through.
//! - A substitution with no value renders as the empty string.
use crate::model::{
    PValDetailObj, PValUpdateKey, Policy, PolicyCacheDetailObj, ResActObj, Role,
    RoleCacheDetailObj, RoleFilter,
};
use std::collections::{HashMap, HashSet};

/// Substitution values for one scope.
pub type ValueMap = HashMap<PValUpdateKey, String>;

fn star_if_empty(value: &str) -> String {
    if value.is_empty() {
        "*".to_string()
    } else {
        value.to_string()
    }
}

/// Build the substitution values for a single-valued scope.
///
/// # What it does
/// `Entity` is always set. Cluster scopes add the cluster, namespace, group,
/// kind, and resource values plus their `*Obj` forms; every other scope adds
/// team, environment, and entity name (as both `App` and `EntityName`) plus
/// the `TeamObj`, `EnvObj`, `AppObj` forms. `*Obj` values are `*` when unset.
pub fn pval_update_map(scope: &RoleFilter) -> ValueMap {
    let mut values = ValueMap::new();
    values.insert(PValUpdateKey::Entity, scope.entity.clone());
    if scope.is_cluster() {
        for (key, obj_key, value) in [
            (PValUpdateKey::Cluster, PValUpdateKey::ClusterObj, &scope.cluster),
            (PValUpdateKey::Namespace, PValUpdateKey::NamespaceObj, &scope.namespace),
            (PValUpdateKey::Group, PValUpdateKey::GroupObj, &scope.group),
            (PValUpdateKey::Kind, PValUpdateKey::KindObj, &scope.kind),
            (PValUpdateKey::Resource, PValUpdateKey::ResourceObj, &scope.resource),
        ] {
            values.insert(key, value.clone());
            values.insert(obj_key, star_if_empty(value));
        }
        return values;
    }
    values.insert(PValUpdateKey::EntityName, scope.entity_name.clone());
    values.insert(PValUpdateKey::Team, scope.team.clone());
    values.insert(PValUpdateKey::App, scope.entity_name.clone());
    values.insert(PValUpdateKey::Env, scope.environment.clone());
    values.insert(PValUpdateKey::TeamObj, star_if_empty(&scope.team));
    values.insert(PValUpdateKey::AppObj, star_if_empty(&scope.entity_name));
    values.insert(PValUpdateKey::EnvObj, star_if_empty(&scope.environment));
    values
}

/// Render one template leaf.
pub fn render(detail: &PValDetailObj, values: &ValueMap) -> String {
    if detail.index_key_map.is_empty() {
        return detail.value.clone();
    }
    let mut out = String::with_capacity(detail.value.len());
    for (index, ch) in detail.value.char_indices() {
        match (ch, detail.index_key_map.get(&index)) {
            ('%', Some(key)) => {
                if let Some(value) = values.get(key) {
                    out.push_str(value);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Render a role template into a role row (id 0, not yet stored).
pub fn render_role(template: &RoleCacheDetailObj, values: &ValueMap) -> Role {
    Role {
        id: 0,
        role: render(&template.role, values),
        entity: render(&template.entity, values),
        team: render(&template.team, values),
        entity_name: render(&template.entity_name, values),
        environment: render(&template.environment, values),
        action: render(&template.action, values),
        access_type: render(&template.access_type, values),
        cluster: render(&template.cluster, values),
        namespace: render(&template.namespace, values),
        group: render(&template.group, values),
        kind: render(&template.kind, values),
        resource: render(&template.resource, values),
    }
}

/// Render `items` as permission tuples for subject `sub`.
pub fn render_res_act_objs(sub: &str, items: &[ResActObj], values: &ValueMap) -> Vec<Policy> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| {
            Policy::permission(
                sub,
                render(&item.res, values),
                render(&item.act, values),
                render(&item.obj, values),
            )
        })
        .filter(|policy| seen.insert(policy.clone()))
        .collect()
}

/// Render a policy template for one scope.
pub fn render_policies(template: &PolicyCacheDetailObj, values: &ValueMap) -> Vec<Policy> {
    let sub = render(&template.sub, values);
    render_res_act_objs(&sub, &template.res_act_obj_set, values)
}

/// Triples present only in `new` (added) and only in `old` (removed).
pub fn diff_res_act_obj_sets(
    old: &[ResActObj],
    new: &[ResActObj],
) -> (Vec<ResActObj>, Vec<ResActObj>) {
    let old_keys: HashSet<String> = old.iter().map(ResActObj::diff_key).collect();
    let new_keys: HashSet<String> = new.iter().map(ResActObj::diff_key).collect();
    let mut emitted = HashSet::new();
    let added = new
        .iter()
        .filter(|item| {
            let key = item.diff_key();
            !old_keys.contains(&key) && emitted.insert(key)
        })
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|item| {
            let key = item.diff_key();
            !new_keys.contains(&key) && emitted.insert(key)
        })
        .cloned()
        .collect();
    (added, removed)
}
