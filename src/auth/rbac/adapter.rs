//! Casbin storage adapter over the service's `casbin_rule` table.
//!
//! # Purpose and responsibility
//! Bridges `casbin::Adapter` to the store's [`PolicyAdapter`], so every
//! mutation the engine accepts is written to the same backend that holds
//! users and roles, and a reload reads the tuples back from it.
//!
//! # Key invariants and assumptions
//! - `p` rules are `[sub, res, act, obj]`; `g` rules are `[sub, role]`.
//! - Rules with any other shape are skipped on load and rejected on write.
use crate::model::{Policy, PolicyType};
use crate::store::{PolicyAdapter, StoreError};
use async_trait::async_trait;
use casbin::error::AdapterError;
use casbin::{Adapter, Filter, Model};
use std::sync::Arc;

/// `casbin::Adapter` backed by a [`PolicyAdapter`].
pub struct StoreAdapter {
    store: Arc<dyn PolicyAdapter>,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn PolicyAdapter>) -> Self {
        Self { store }
    }

    async fn stored_rules(&self) -> casbin::Result<Vec<Policy>> {
        self.store.load_policy_rules().await.map_err(adapter_error)
    }

    async fn save(&self, policies: &[Policy]) -> casbin::Result<bool> {
        if policies.is_empty() {
            return Ok(true);
        }
        self.store
            .save_policy_rules(policies)
            .await
            .map_err(adapter_error)?;
        Ok(true)
    }

    async fn remove(&self, policies: &[Policy]) -> casbin::Result<bool> {
        if policies.is_empty() {
            return Ok(false);
        }
        self.store
            .remove_policy_rules(policies)
            .await
            .map_err(adapter_error)?;
        Ok(true)
    }
}

fn adapter_error(err: StoreError) -> casbin::Error {
    AdapterError(Box::new(err)).into()
}

fn malformed(ptype: &str, rule: &[String]) -> casbin::Error {
    AdapterError(format!("malformed {ptype} rule: {rule:?}").into()).into()
}

/// Casbin rule vector for a stored tuple.
pub fn policy_to_rule(policy: &Policy) -> Vec<String> {
    match policy.ptype {
        PolicyType::P => vec![
            policy.sub.clone(),
            policy.res.clone(),
            policy.act.clone(),
            policy.obj.clone(),
        ],
        PolicyType::G => vec![policy.sub.clone(), policy.obj.clone()],
    }
}

/// Stored tuple for a casbin rule vector, or `None` when the shape is wrong.
pub fn rule_to_policy(ptype: &str, rule: &[String]) -> Option<Policy> {
    match (ptype, rule) {
        ("p", [sub, res, act, obj]) => Some(Policy::permission(sub, res, act, obj)),
        ("g", [sub, role]) => Some(Policy::grouping(sub, role)),
        _ => None,
    }
}

fn rules_to_policies(ptype: &str, rules: &[Vec<String>]) -> casbin::Result<Vec<Policy>> {
    rules
        .iter()
        .map(|rule| rule_to_policy(ptype, rule).ok_or_else(|| malformed(ptype, rule)))
        .collect()
}

/// True when `rule` carries `values` from `field_index` on; empty values match anything.
fn matches_filter(rule: &[String], field_index: usize, values: &[String]) -> bool {
    values.iter().enumerate().all(|(offset, value)| {
        value.is_empty()
            || rule
                .get(field_index + offset)
                .is_some_and(|field| field == value)
    })
}

fn load_into(model: &mut dyn Model, policy: &Policy) {
    let ptype = policy.ptype.as_str();
    model.add_policy(ptype, ptype, policy_to_rule(policy));
}

#[async_trait]
impl Adapter for StoreAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        for policy in self.stored_rules().await? {
            load_into(m, &policy);
        }
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: Filter<'a>,
    ) -> casbin::Result<()> {
        for policy in self.stored_rules().await? {
            let filter = match policy.ptype {
                PolicyType::P => &f.p,
                PolicyType::G => &f.g,
            };
            let values: Vec<String> = filter.iter().map(|v| v.to_string()).collect();
            if matches_filter(&policy_to_rule(&policy), 0, &values) {
                load_into(m, &policy);
            }
        }
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let mut wanted = Vec::new();
        for ptype in ["p", "g"] {
            wanted.extend(rules_to_policies(ptype, &m.get_policy(ptype, ptype))?);
        }
        let stale: Vec<Policy> = self
            .stored_rules()
            .await?
            .into_iter()
            .filter(|policy| !wanted.contains(policy))
            .collect();
        self.remove(&stale).await?;
        self.save(&wanted).await?;
        Ok(())
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        let all = self.stored_rules().await?;
        self.remove(&all).await?;
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        false
    }

    async fn add_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        let policy = rule_to_policy(ptype, &rule).ok_or_else(|| malformed(ptype, &rule))?;
        self.save(&[policy]).await
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let policies = rules_to_policies(ptype, &rules)?;
        self.save(&policies).await
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        let policy = rule_to_policy(ptype, &rule).ok_or_else(|| malformed(ptype, &rule))?;
        self.remove(&[policy]).await
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let policies = rules_to_policies(ptype, &rules)?;
        self.remove(&policies).await
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        if field_values.is_empty() {
            return Ok(false);
        }
        let doomed: Vec<Policy> = self
            .stored_rules()
            .await?
            .into_iter()
            .filter(|policy| policy.ptype.as_str() == ptype)
            .filter(|policy| matches_filter(&policy_to_rule(policy), field_index, &field_values))
            .collect();
        self.remove(&doomed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use casbin::DefaultModel;

    fn adapter() -> (StoreAdapter, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (StoreAdapter::new(store.clone()), store)
    }

    #[test]
    fn rules_keep_their_shape() {
        let edge = Policy::grouping("alice@x", "group:ops");
        assert_eq!(policy_to_rule(&edge), vec!["alice@x", "group:ops"]);
        let rule: Vec<String> = ["role:r", "team", "get", "*"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            rule_to_policy("p", &rule),
            Some(Policy::permission("role:r", "team", "get", "*"))
        );
        assert_eq!(rule_to_policy("g", &rule), None);
    }

    #[test]
    fn empty_filter_values_are_wildcards() {
        let rule = vec!["bob@x".to_string(), "role:r".to_string()];
        assert!(matches_filter(&rule, 0, &["bob@x".to_string()]));
        assert!(matches_filter(&rule, 0, &[String::new(), "role:r".to_string()]));
        assert!(!matches_filter(&rule, 1, &["bob@x".to_string()]));
        assert!(!matches_filter(&rule, 1, &["role:r".to_string(), "x".to_string()]));
    }

    #[tokio::test]
    async fn writes_reach_the_store_and_load_back() {
        let (mut adapter, store) = adapter();
        let rule = vec!["carol@x".to_string(), "role:r".to_string()];
        assert!(adapter.add_policy("g", "g", rule.clone()).await.expect("add"));
        assert!(
            store
                .load_policy_rules()
                .await
                .expect("rules")
                .contains(&Policy::grouping("carol@x", "role:r"))
        );

        let mut model = DefaultModel::from_str(crate::auth::rbac::MODEL_CONF)
            .await
            .expect("model");
        adapter.load_policy(&mut model).await.expect("load");
        assert!(model.has_policy("g", "g", rule));
        assert!(model.has_policy(
            "g",
            "g",
            vec!["admin".to_string(), "role:super-admin___".to_string()]
        ));
    }

    #[tokio::test]
    async fn filtered_removal_drops_only_matching_edges() {
        let (mut adapter, store) = adapter();
        adapter
            .add_policies(
                "g",
                "g",
                vec![
                    vec!["dan@x".to_string(), "role:a".to_string()],
                    vec!["dan@x".to_string(), "role:b".to_string()],
                    vec!["eve@x".to_string(), "role:a".to_string()],
                ],
            )
            .await
            .expect("add");
        assert!(
            adapter
                .remove_filtered_policy("g", "g", 0, vec!["dan@x".to_string()])
                .await
                .expect("remove")
        );
        let rules = store.load_policy_rules().await.expect("rules");
        assert!(!rules.iter().any(|p| p.sub == "dan@x"));
        assert!(rules.contains(&Policy::grouping("eve@x", "role:a")));
    }

    #[tokio::test]
    async fn malformed_rules_are_rejected() {
        let (mut adapter, _) = adapter();
        let err = adapter
            .add_policy("p", "p", vec!["only".to_string(), "two".to_string()])
            .await
            .expect_err("short rule");
        assert!(err.to_string().contains("malformed"));
    }
}
