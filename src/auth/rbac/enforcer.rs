//! Casbin-backed policy engine.
//!
//! # Purpose and responsibility
//! Wraps a `casbin::CachedEnforcer` built from [`MODEL_CONF`] and persisted
//! through [`StoreAdapter`], and exposes the narrow [`PolicyEngine`] surface the
//! services and the middleware use.
//!
//! # Key invariants and assumptions
//! - Decisions follow
//!   `g(r.sub, p.sub) && keyMatch(r.res, p.res) && keyMatch(r.act, p.act) && matchKeyByPart(r.obj, p.obj)`.
//! - Role inheritance goes through Casbin's default role manager (depth 10).
//! - Casbin applies a mutation in memory only after the adapter accepted it.
//!
//! # Concurrency
//! The enforcer sits behind a `tokio::sync::RwLock`; writers hold the lock
//! across the adapter call so memory and storage apply mutations in the same
//! order. The decision cache is shared with Casbin and cleared on every
//! accepted mutation.
use crate::auth::rbac::MODEL_CONF;
use crate::auth::rbac::adapter::{StoreAdapter, policy_to_rule};
use crate::auth::rbac::matcher::match_key_by_part;
use crate::config::EnforcerConfig;
use crate::model::Policy;
use crate::observability;
use crate::store::PolicyAdapter;
use async_trait::async_trait;
use casbin::function_map::{OperatorFunction, dynamic_to_str};
use casbin::rhai::Dynamic;
use casbin::{
    Cache, CachedApi, CachedEnforcer, CoreApi, DefaultModel, MgmtApi, RbacApi,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Casbin(#[from] casbin::Error),
}

/// Policy engine operations used by the services and the middleware.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Add tuples not already present; returns how many were added.
    async fn add_policies(&self, policies: &[Policy]) -> Result<usize, EngineError>;
    /// Remove tuples that are present; returns how many were removed.
    async fn remove_policies(&self, policies: &[Policy]) -> Result<usize, EngineError>;
    /// Replace the in-memory model with the adapter's tuple set.
    async fn load_policy(&self) -> Result<(), EngineError>;
    async fn enforce(&self, sub: &str, res: &str, act: &str, obj: &str) -> bool;
    async fn enforce_in_batch(
        &self,
        sub: &str,
        res: &str,
        act: &str,
        objs: &[String],
    ) -> HashMap<String, bool>;
    /// Direct roles of `sub` (one `g` hop).
    async fn roles_for_user(&self, sub: &str) -> Vec<String>;
    /// Direct members of `role` (one `g` hop).
    async fn users_for_role(&self, role: &str) -> Vec<String>;
    /// Remove every `g` edge whose subject is `sub`.
    async fn delete_roles_for_user(&self, sub: &str) -> Result<usize, EngineError>;
    fn invalidate_cache(&self, sub: &str);
}

/// Decision cache handed to Casbin. Keys are Casbin's request hashes, so
/// invalidation is all-or-nothing.
#[derive(Debug)]
struct DecisionCache {
    /// `None` disables caching.
    ttl: Option<Duration>,
    entries: DashMap<u64, (bool, Instant)>,
}

impl DecisionCache {
    fn new(config: &EnforcerConfig) -> Self {
        Self {
            ttl: config
                .cache_enabled
                .then(|| Duration::from_secs(config.cache_expiration_secs)),
            entries: DashMap::new(),
        }
    }
}

/// Shared handle so the engine can clear the cache without the write lock.
struct SharedCache(Arc<DecisionCache>);

impl Cache<u64, bool> for SharedCache {
    fn get(&self, k: &u64) -> Option<bool> {
        let ttl = self.0.ttl?;
        let entry = self.0.entries.get(k)?;
        let (allowed, stored_at) = *entry;
        (stored_at.elapsed() < ttl).then_some(allowed)
    }

    fn has(&self, k: &u64) -> bool {
        self.get(k).is_some()
    }

    fn set(&self, k: u64, v: bool) {
        if self.0.ttl.is_some() {
            self.0.entries.insert(k, (v, Instant::now()));
        }
    }

    fn clear(&self) {
        self.0.entries.clear();
    }
}

fn match_key_by_part_fn() -> OperatorFunction {
    OperatorFunction::Arg2(|key: Dynamic, pattern: Dynamic| {
        match_key_by_part(&dynamic_to_str(&key), &dynamic_to_str(&pattern)).into()
    })
}

/// Policy engine persisted through a [`PolicyAdapter`].
pub struct Enforcer {
    inner: RwLock<CachedEnforcer>,
    cache: Arc<DecisionCache>,
    max_batch_size: usize,
}

impl Enforcer {
    /// Build the Casbin enforcer and load the adapter's tuples.
    ///
    /// # Errors
    /// - Invalid model text or adapter read failures.
    pub async fn new(
        adapter: Arc<dyn PolicyAdapter>,
        config: &EnforcerConfig,
    ) -> Result<Self, EngineError> {
        let model = DefaultModel::from_str(MODEL_CONF).await?;
        let mut enforcer = CachedEnforcer::new(model, StoreAdapter::new(adapter)).await?;
        enforcer.add_function("matchKeyByPart", match_key_by_part_fn());
        let cache = Arc::new(DecisionCache::new(config));
        enforcer.set_cache(Box::new(SharedCache(cache.clone())));
        Ok(Self {
            inner: RwLock::new(enforcer),
            cache,
            max_batch_size: config.max_batch_size.max(1),
        })
    }
}

fn record_decision(allowed: bool) {
    let result = if allowed { "allow" } else { "deny" };
    metrics::counter!(observability::ENFORCE_TOTAL, "result" => result).increment(1);
}

fn decide(enforcer: &CachedEnforcer, sub: &str, res: &str, act: &str, obj: &str) -> bool {
    match enforcer.enforce((sub, res, act, obj)) {
        Ok(allowed) => allowed,
        Err(err) => {
            tracing::warn!(error = %err, sub, res, act, obj, "policy evaluation failed");
            false
        }
    }
}

/// Split `policies` into `p` and `g` rule vectors, dropping duplicates and
/// keeping only those for which `keep` holds.
fn partition_rules<F>(policies: &[Policy], keep: F) -> (Vec<Vec<String>>, Vec<Vec<String>>)
where
    F: Fn(&Policy, &[String]) -> bool,
{
    let mut permissions: Vec<Vec<String>> = Vec::new();
    let mut groupings: Vec<Vec<String>> = Vec::new();
    for policy in policies {
        let rule = policy_to_rule(policy);
        let bucket = if policy.is_grouping() {
            &mut groupings
        } else {
            &mut permissions
        };
        if !bucket.contains(&rule) && keep(policy, &rule) {
            bucket.push(rule);
        }
    }
    (permissions, groupings)
}

fn is_present(enforcer: &CachedEnforcer, policy: &Policy, rule: &[String]) -> bool {
    if policy.is_grouping() {
        enforcer.has_grouping_policy(rule.to_vec())
    } else {
        enforcer.has_policy(rule.to_vec())
    }
}

#[async_trait]
impl PolicyEngine for Enforcer {
    async fn add_policies(&self, policies: &[Policy]) -> Result<usize, EngineError> {
        let mut enforcer = self.inner.write().await;
        // Step 1: Casbin rejects a batch holding a known rule, so keep only new ones.
        let (permissions, groupings) =
            partition_rules(policies, |policy, rule| !is_present(&enforcer, policy, rule));
        let added = permissions.len() + groupings.len();
        if added == 0 {
            return Ok(0);
        }
        // Step 2: the adapter persists before Casbin applies each batch.
        if !permissions.is_empty() {
            enforcer.add_policies(permissions).await?;
        }
        if !groupings.is_empty() {
            enforcer.add_grouping_policies(groupings).await?;
        }
        metrics::counter!(observability::POLICY_MUTATIONS_TOTAL, "op" => "add")
            .increment(added as u64);
        tracing::debug!(count = added, "policies added");
        Ok(added)
    }

    async fn remove_policies(&self, policies: &[Policy]) -> Result<usize, EngineError> {
        let mut enforcer = self.inner.write().await;
        let (permissions, groupings) =
            partition_rules(policies, |policy, rule| is_present(&enforcer, policy, rule));
        let removed = permissions.len() + groupings.len();
        if removed == 0 {
            return Ok(0);
        }
        if !permissions.is_empty() {
            enforcer.remove_policies(permissions).await?;
        }
        if !groupings.is_empty() {
            enforcer.remove_grouping_policies(groupings).await?;
        }
        metrics::counter!(observability::POLICY_MUTATIONS_TOTAL, "op" => "remove")
            .increment(removed as u64);
        tracing::debug!(count = removed, "policies removed");
        Ok(removed)
    }

    async fn load_policy(&self) -> Result<(), EngineError> {
        let mut enforcer = self.inner.write().await;
        enforcer.load_policy().await?;
        self.cache.entries.clear();
        Ok(())
    }

    async fn enforce(&self, sub: &str, res: &str, act: &str, obj: &str) -> bool {
        let enforcer = self.inner.read().await;
        let allowed = decide(&enforcer, sub, res, act, obj);
        record_decision(allowed);
        allowed
    }

    async fn enforce_in_batch(
        &self,
        sub: &str,
        res: &str,
        act: &str,
        objs: &[String],
    ) -> HashMap<String, bool> {
        let mut decisions = HashMap::with_capacity(objs.len());
        // One read lock per chunk so a long batch does not starve writers.
        for chunk in objs.chunks(self.max_batch_size) {
            let enforcer = self.inner.read().await;
            for obj in chunk {
                let allowed = decide(&enforcer, sub, res, act, obj);
                record_decision(allowed);
                decisions.insert(obj.clone(), allowed);
            }
        }
        decisions
    }

    async fn roles_for_user(&self, sub: &str) -> Vec<String> {
        let mut roles = self.inner.read().await.get_roles_for_user(sub, None);
        roles.sort();
        roles
    }

    async fn users_for_role(&self, role: &str) -> Vec<String> {
        let mut users = self.inner.read().await.get_users_for_role(role, None);
        users.sort();
        users
    }

    async fn delete_roles_for_user(&self, sub: &str) -> Result<usize, EngineError> {
        let mut enforcer = self.inner.write().await;
        let count = enforcer
            .get_filtered_grouping_policy(0, vec![sub.to_string()])
            .len();
        if count == 0 {
            return Ok(0);
        }
        enforcer.delete_roles_for_user(sub, None).await?;
        metrics::counter!(observability::POLICY_MUTATIONS_TOTAL, "op" => "remove")
            .increment(count as u64);
        tracing::debug!(sub, count, "role edges removed");
        Ok(count)
    }

    fn invalidate_cache(&self, sub: &str) {
        tracing::debug!(sub, "decision cache cleared");
        self.cache.entries.clear();
    }
}
