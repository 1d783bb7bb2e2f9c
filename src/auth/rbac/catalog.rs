//! Builtin preset declarations and the custom-role resource catalog.
//!
//! # Purpose
//! Declares the preset roles seeded into `default_rbac_role_data` on first
//! start and translates custom role definitions (`RbacRoleDto`) into the same
//! template shape.
//!
//! # Notes
//! Role names follow one pattern per entity:
//! - apps: `role:<action>_<team>_<env>_<app>` (helm: `helm-app:<action>_...`)
//! - chart-group: `role:chart-group_admin`, `role:chart-group_view`,
//!   `role:chart-group_<name>_specific`
//! - cluster: `role:cluster_<cluster>_<ns>_<group>_<kind>_<resource>_<action>`
use crate::model::{
    ACCESS_TYPE_HELM_APP, ACTION_UPDATE, DefaultRbacRoleData, ENTITY_APPS, ENTITY_CHART_GROUP,
    ENTITY_CLUSTER, PValDetailObj, PValUpdateKey as K, Policy, PolicyCacheDetailObj, RbacRoleDto,
    ResActObj, RoleCacheDetailObj, SUPER_ADMIN_ROLE, TemplatePart,
};
use thiserror::Error;

/// Tuple granting the super-admin role everything.
pub fn super_admin_policy() -> Policy {
    Policy::permission(SUPER_ADMIN_ROLE, "*", "*", "*")
}

fn lit(value: &str) -> PValDetailObj {
    PValDetailObj::literal(value)
}

fn key(k: K) -> PValDetailObj {
    PValDetailObj::placeholder(k)
}

/// Placeholders joined by `/`, e.g. `TeamObj/AppObj`.
fn obj(keys: &[K]) -> PValDetailObj {
    let mut parts = Vec::with_capacity(keys.len() * 2);
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            parts.push(TemplatePart::Lit("/"));
        }
        parts.push(TemplatePart::Key(*k));
    }
    PValDetailObj::from_parts(&parts)
}

/// `prefix` followed by `_<placeholder>` for each key, then `suffix`.
fn scoped_name(prefix: &str, keys: &[K], suffix: &str) -> PValDetailObj {
    let mut parts = vec![TemplatePart::Lit(prefix)];
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            parts.push(TemplatePart::Lit("_"));
        }
        parts.push(TemplatePart::Key(*k));
    }
    parts.push(TemplatePart::Lit(suffix));
    PValDetailObj::from_parts(&parts)
}

fn triple(res: &str, act: &str, object: PValDetailObj) -> ResActObj {
    ResActObj {
        res: lit(res),
        act: lit(act),
        obj: object,
    }
}

fn app_role(access_type: &str, action: &str, prefix: &str) -> RoleCacheDetailObj {
    RoleCacheDetailObj {
        entity: lit(ENTITY_APPS),
        team: key(K::Team),
        environment: key(K::Env),
        entity_name: key(K::App),
        action: lit(action),
        access_type: lit(access_type),
        role: scoped_name(&format!("{prefix}:{action}_"), &[K::Team, K::Env, K::App], ""),
        ..RoleCacheDetailObj::default()
    }
}

fn cluster_role(action: &str) -> RoleCacheDetailObj {
    let suffix = format!("_{action}");
    let mut parts = vec![TemplatePart::Lit("role:"), TemplatePart::Key(K::Entity)];
    for k in [K::Cluster, K::Namespace, K::Group, K::Kind, K::Resource] {
        parts.push(TemplatePart::Lit("_"));
        parts.push(TemplatePart::Key(k));
    }
    parts.push(TemplatePart::Lit(&suffix));
    RoleCacheDetailObj {
        entity: key(K::Entity),
        cluster: key(K::Cluster),
        namespace: key(K::Namespace),
        group: key(K::Group),
        kind: key(K::Kind),
        resource: key(K::Resource),
        action: lit(action),
        role: PValDetailObj::from_parts(&parts),
        ..RoleCacheDetailObj::default()
    }
}

fn global_role(action: &str, role: PValDetailObj, with_name: bool) -> RoleCacheDetailObj {
    RoleCacheDetailObj {
        entity: key(K::Entity),
        entity_name: if with_name {
            key(K::EntityName)
        } else {
            PValDetailObj::default()
        },
        action: lit(action),
        role,
        ..RoleCacheDetailObj::default()
    }
}

fn preset(
    entity: &str,
    access_type: &str,
    action: &str,
    display: &str,
    description: &str,
    role_data: RoleCacheDetailObj,
    res_act_obj_set: Vec<ResActObj>,
) -> DefaultRbacRoleData {
    let policy_data = PolicyCacheDetailObj {
        policy_type: lit("p"),
        sub: role_data.role.clone(),
        res_act_obj_set,
    };
    DefaultRbacRoleData {
        id: 0,
        entity: entity.to_string(),
        access_type: access_type.to_string(),
        role: action.to_string(),
        role_display_name: display.to_string(),
        role_description: description.to_string(),
        role_data,
        policy_data,
        enabled: true,
    }
}

/// Terminal access triple added to the `apps` trigger preset on request.
pub fn terminal_exec_triple() -> ResActObj {
    triple("terminal", "exec", obj(&[K::TeamObj, K::EnvObj, K::AppObj]))
}

/// Every builtin preset, in seeding order.
pub fn builtin_presets() -> Vec<DefaultRbacRoleData> {
    let team_app = || obj(&[K::TeamObj, K::AppObj]);
    let env_app = || obj(&[K::EnvObj, K::AppObj]);
    let team = || obj(&[K::TeamObj]);
    let env = || obj(&[K::EnvObj]);
    let app_base = |act: &str| {
        vec![
            triple("applications", act, team_app()),
            triple("environment", act, env_app()),
            triple("team", "get", team()),
            triple("global-environment", "get", env()),
        ]
    };

    let mut presets = Vec::new();

    // apps / devtron apps
    presets.push(preset(
        ENTITY_APPS,
        "",
        "admin",
        "Admin",
        "Can create, edit, and delete applications in scope",
        app_role("", "admin", "role"),
        app_base("*"),
    ));
    let mut manager = app_base("*");
    manager.push(triple("user", "*", team()));
    manager.push(triple("notification", "*", team()));
    presets.push(preset(
        ENTITY_APPS,
        "",
        "manager",
        "Manager",
        "Admin rights plus user and notification management for the team",
        app_role("", "manager", "role"),
        manager,
    ));
    presets.push(preset(
        ENTITY_APPS,
        "",
        "trigger",
        "Build and deploy",
        "Can view applications and trigger builds and deployments",
        app_role("", "trigger", "role"),
        vec![
            triple("applications", "get", team_app()),
            triple("applications", "trigger", team_app()),
            triple("environment", "trigger", env_app()),
            triple("environment", "get", env_app()),
            triple("global-environment", "get", env()),
            triple("team", "get", team()),
        ],
    ));
    presets.push(preset(
        ENTITY_APPS,
        "",
        "view",
        "View only",
        "Can view applications in scope",
        app_role("", "view", "role"),
        app_base("get"),
    ));

    // apps / helm apps
    let helm_obj = || obj(&[K::TeamObj, K::EnvObj, K::AppObj]);
    let helm = |acts: &[&str]| {
        let mut set: Vec<ResActObj> = acts
            .iter()
            .map(|act| triple(ACCESS_TYPE_HELM_APP, act, helm_obj()))
            .collect();
        set.push(triple("global-environment", "get", env()));
        set.push(triple("team", "get", team()));
        set
    };
    for (action, display, acts) in [
        ("admin", "Admin", &["*"][..]),
        ("edit", "Edit", &["get", "update"][..]),
        ("view", "View only", &["get"][..]),
    ] {
        presets.push(preset(
            ENTITY_APPS,
            ACCESS_TYPE_HELM_APP,
            action,
            display,
            "Helm application access in scope",
            app_role(ACCESS_TYPE_HELM_APP, action, ACCESS_TYPE_HELM_APP),
            helm(acts),
        ));
    }

    // chart groups
    let entity_res = |act: &str, object: PValDetailObj| ResActObj {
        res: key(K::Entity),
        act: lit(act),
        obj: object,
    };
    presets.push(preset(
        ENTITY_CHART_GROUP,
        "",
        "admin",
        "Admin",
        "Can manage every chart group",
        global_role(
            "admin",
            scoped_name("role:", &[K::Entity], "_admin"),
            false,
        ),
        vec![entity_res("*", lit("*")), triple("team", "get", lit("*"))],
    ));
    presets.push(preset(
        ENTITY_CHART_GROUP,
        "",
        "view",
        "View only",
        "Can view every chart group",
        global_role("view", scoped_name("role:", &[K::Entity], "_view"), false),
        vec![entity_res("get", lit("*")), triple("team", "get", lit("*"))],
    ));
    presets.push(preset(
        ENTITY_CHART_GROUP,
        "",
        ACTION_UPDATE,
        "Specific",
        "Can view and update one chart group",
        global_role(
            ACTION_UPDATE,
            scoped_name("role:", &[K::Entity, K::EntityName], "_specific"),
            true,
        ),
        vec![
            entity_res(ACTION_UPDATE, key(K::EntityName)),
            entity_res("get", key(K::EntityName)),
        ],
    ));

    // cluster resources
    let cluster_obj = || {
        obj(&[
            K::ClusterObj,
            K::NamespaceObj,
            K::GroupObj,
            K::KindObj,
            K::ResourceObj,
        ])
    };
    for (action, display, acts) in [
        ("admin", "Admin", &["*"][..]),
        ("edit", "Edit", &["get", "update"][..]),
        ("view", "View only", &["get"][..]),
    ] {
        presets.push(preset(
            ENTITY_CLUSTER,
            "",
            action,
            display,
            "Kubernetes resource access in scope",
            cluster_role(action),
            acts.iter()
                .map(|act| triple(ENTITY_CLUSTER, act, cluster_obj()))
                .collect(),
        ));
    }
    presets
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("role name is required")]
    EmptyRoleName,
    #[error("role name may only contain letters, digits, '-' and '.'")]
    InvalidRoleName,
    #[error("no resources defined for entity {entity} and access type {access_type}")]
    UnknownEntity { entity: String, access_type: String },
    #[error("resource {0} is not available for this entity")]
    UnknownResource(String),
    #[error("resource {0} has no actions")]
    NoActions(String),
}

/// Scope placeholders a custom role of this entity carries in its name.
fn scope_keys(entity: &str) -> &'static [K] {
    match entity {
        ENTITY_APPS => &[K::Team, K::Env, K::App],
        ENTITY_CLUSTER => &[K::Cluster, K::Namespace, K::Group, K::Kind, K::Resource],
        _ => &[],
    }
}

/// Object template for `resource` under `(entity, access_type)`, or `None`
/// when the resource is not offered there.
fn resource_object(entity: &str, access_type: &str, resource: &str) -> Option<PValDetailObj> {
    let keys: &[K] = match (entity, access_type, resource) {
        (ENTITY_APPS, "", "applications") => &[K::TeamObj, K::AppObj],
        (ENTITY_APPS, "", "environment") => &[K::EnvObj, K::AppObj],
        (ENTITY_APPS, "", "terminal") => &[K::TeamObj, K::EnvObj, K::AppObj],
        (ENTITY_APPS, "", "user" | "notification" | "team") => &[K::TeamObj],
        (ENTITY_APPS, "", "global-environment") => &[K::EnvObj],
        (ENTITY_APPS, ACCESS_TYPE_HELM_APP, ACCESS_TYPE_HELM_APP) => {
            &[K::TeamObj, K::EnvObj, K::AppObj]
        }
        (ENTITY_APPS, ACCESS_TYPE_HELM_APP, "team") => &[K::TeamObj],
        (ENTITY_APPS, ACCESS_TYPE_HELM_APP, "global-environment") => &[K::EnvObj],
        (ENTITY_CLUSTER, "", ENTITY_CLUSTER) => &[
            K::ClusterObj,
            K::NamespaceObj,
            K::GroupObj,
            K::KindObj,
            K::ResourceObj,
        ],
        (ENTITY_CHART_GROUP, "", ENTITY_CHART_GROUP | "team") => return Some(lit("*")),
        _ => return None,
    };
    Some(obj(keys))
}

fn entity_known(entity: &str, access_type: &str) -> bool {
    matches!(
        (entity, access_type),
        (ENTITY_APPS, "") | (ENTITY_APPS, ACCESS_TYPE_HELM_APP) | (ENTITY_CLUSTER, "")
            | (ENTITY_CHART_GROUP, "")
    )
}

/// Translate a custom role definition into role and policy templates.
///
/// # What it does
/// Names the role `<entity>[/<accessType>]:<roleName>` followed by `_<scope>`
/// for each scope placeholder of the entity, and emits one triple per
/// resource action. A `*` action replaces the resource's other actions.
///
/// # Errors
/// - [`CatalogError`] for an empty or malformed role name, an unknown entity,
///   an unknown resource, or a resource without actions.
pub fn custom_role_templates(
    dto: &RbacRoleDto,
) -> Result<(RoleCacheDetailObj, PolicyCacheDetailObj), CatalogError> {
    let name = dto.role_name.trim();
    if name.is_empty() {
        return Err(CatalogError::EmptyRoleName);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(CatalogError::InvalidRoleName);
    }
    let entity = dto.entity.as_str();
    let access_type = dto.access_type.as_str();
    if !entity_known(entity, access_type) {
        return Err(CatalogError::UnknownEntity {
            entity: entity.to_string(),
            access_type: access_type.to_string(),
        });
    }

    // Step 1: resource triples.
    let mut set = Vec::new();
    for detail in &dto.resource_detail_list {
        let object = resource_object(entity, access_type, &detail.resource)
            .ok_or_else(|| CatalogError::UnknownResource(detail.resource.clone()))?;
        if detail.actions.is_empty() {
            return Err(CatalogError::NoActions(detail.resource.clone()));
        }
        let actions: Vec<&str> = if detail.actions.iter().any(|a| a == "*") {
            vec!["*"]
        } else {
            detail.actions.iter().map(String::as_str).collect()
        };
        for action in actions {
            set.push(triple(&detail.resource, action, object.clone()));
        }
    }

    // Step 2: role template.
    let prefix = if access_type.is_empty() {
        format!("{entity}:{name}")
    } else {
        format!("{entity}/{access_type}:{name}")
    };
    let keys = scope_keys(entity);
    let role_name = if keys.is_empty() {
        lit(&prefix)
    } else {
        scoped_name(&format!("{prefix}_"), keys, "")
    };
    let mut role = RoleCacheDetailObj {
        entity: lit(entity),
        action: lit(name),
        access_type: lit(access_type),
        role: role_name.clone(),
        ..RoleCacheDetailObj::default()
    };
    match entity {
        ENTITY_APPS => {
            role.team = key(K::Team);
            role.environment = key(K::Env);
            role.entity_name = key(K::App);
        }
        ENTITY_CLUSTER => {
            role.cluster = key(K::Cluster);
            role.namespace = key(K::Namespace);
            role.group = key(K::Group);
            role.kind = key(K::Kind);
            role.resource = key(K::Resource);
        }
        _ => {}
    }
    let policy = PolicyCacheDetailObj {
        policy_type: lit("p"),
        sub: role_name,
        res_act_obj_set: set,
    };
    Ok((role, policy))
}
