//! Policy tuples exchanged with the policy engine.
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub enum PolicyType {
    #[serde(rename = "p")]
    P,
    #[serde(rename = "g")]
    G,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::P => "p",
            PolicyType::G => "g",
        }
    }
}

/// A `p` permission `(sub, res, act, obj)` or a `g` membership edge where
/// `sub` inherits the role named in `obj`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub struct Policy {
    #[serde(rename = "type")]
    pub ptype: PolicyType,
    pub sub: String,
    #[serde(default)]
    pub res: String,
    #[serde(default)]
    pub act: String,
    pub obj: String,
}

impl Policy {
    pub fn permission(
        sub: impl Into<String>,
        res: impl Into<String>,
        act: impl Into<String>,
        obj: impl Into<String>,
    ) -> Self {
        Self {
            ptype: PolicyType::P,
            sub: sub.into(),
            res: res.into(),
            act: act.into(),
            obj: obj.into(),
        }
    }

    pub fn grouping(sub: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            ptype: PolicyType::G,
            sub: sub.into(),
            res: String::new(),
            act: String::new(),
            obj: role.into(),
        }
    }

    pub fn is_grouping(&self) -> bool {
        self.ptype == PolicyType::G
    }
}
