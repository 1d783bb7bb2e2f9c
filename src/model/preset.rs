//! Preset role and policy templates.
//!
//! # Purpose
//! Describes the templated documents stored in `rbac_role_data`,
//! `rbac_policy_data`, and `default_rbac_role_data`, plus the API shape used to
//! define custom preset roles.
//!
//! # Notes
//! A template leaf (`PValDetailObj`) is a literal `value` in which every `%`
//! byte listed in `indexKeyMap` is replaced by the substitution named there.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Named substitution slots usable inside preset templates.
///
/// `*Obj` variants render the value used inside policy objects: the concrete
/// scope value, or `*` when the scope is unset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub enum PValUpdateKey {
    Entity,
    EntityName,
    Team,
    App,
    Env,
    TeamObj,
    AppObj,
    EnvObj,
    Cluster,
    Namespace,
    Group,
    Kind,
    Resource,
    ClusterObj,
    NamespaceObj,
    GroupObj,
    KindObj,
    ResourceObj,
}

/// Piece of a template under construction.
#[derive(Debug, Clone, Copy)]
pub enum TemplatePart<'a> {
    Lit(&'a str),
    Key(PValUpdateKey),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PValDetailObj {
    pub value: String,
    #[schema(value_type = Object)]
    pub index_key_map: BTreeMap<usize, PValUpdateKey>,
}

impl PValDetailObj {
    pub fn literal(value: &str) -> Self {
        Self {
            value: value.to_string(),
            index_key_map: BTreeMap::new(),
        }
    }

    pub fn placeholder(key: PValUpdateKey) -> Self {
        Self::from_parts(&[TemplatePart::Key(key)])
    }

    /// Build a template from literal text and placeholders, recording the
    /// byte offset of every placeholder.
    pub fn from_parts(parts: &[TemplatePart<'_>]) -> Self {
        let mut value = String::new();
        let mut index_key_map = BTreeMap::new();
        for part in parts {
            match part {
                TemplatePart::Lit(text) => value.push_str(text),
                TemplatePart::Key(key) => {
                    index_key_map.insert(value.len(), *key);
                    value.push('%');
                }
            }
        }
        Self {
            value,
            index_key_map,
        }
    }
}

/// Role template: one leaf per scoping column plus the role name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleCacheDetailObj {
    pub entity: PValDetailObj,
    pub entity_name: PValDetailObj,
    pub team: PValDetailObj,
    pub environment: PValDetailObj,
    pub access_type: PValDetailObj,
    pub action: PValDetailObj,
    pub cluster: PValDetailObj,
    pub namespace: PValDetailObj,
    pub group: PValDetailObj,
    pub kind: PValDetailObj,
    pub resource: PValDetailObj,
    pub role: PValDetailObj,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ResActObj {
    pub res: PValDetailObj,
    pub act: PValDetailObj,
    pub obj: PValDetailObj,
}

impl ResActObj {
    /// Set identity used by the preset diff.
    pub fn diff_key(&self) -> String {
        format!(
            "res:{:?},act:{:?},obj:{:?}",
            self.res, self.act, self.obj
        )
    }
}

/// Policy template: the subject plus the `(res, act, obj)` triples granted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyCacheDetailObj {
    #[serde(rename = "type")]
    pub policy_type: PValDetailObj,
    pub sub: PValDetailObj,
    pub res_act_obj_set: Vec<ResActObj>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RbacRoleData {
    pub id: i32,
    pub entity: String,
    pub access_type: String,
    pub role: String,
    pub role_display_name: String,
    pub role_description: String,
    pub role_data: RoleCacheDetailObj,
    pub is_preset_role: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RbacPolicyData {
    pub id: i32,
    pub entity: String,
    pub access_type: String,
    pub role: String,
    pub policy_data: PolicyCacheDetailObj,
    pub is_preset_role: bool,
    pub deleted: bool,
}

/// Declared preset, reconciled into the live tables at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultRbacRoleData {
    pub id: i32,
    pub entity: String,
    pub access_type: String,
    pub role: String,
    pub role_display_name: String,
    pub role_description: String,
    pub role_data: RoleCacheDetailObj,
    pub policy_data: PolicyCacheDetailObj,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RbacPolicyResource {
    pub resource: String,
    pub actions: Vec<String>,
}

/// Custom preset role definition accepted by the default-role endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RbacRoleDto {
    pub id: i32,
    pub role_name: String,
    pub role_display_name: String,
    pub role_description: String,
    pub entity: String,
    pub access_type: String,
    pub resource_detail_list: Vec<RbacPolicyResource>,
    pub update_policies_for_existing_provided_roles: bool,
}
