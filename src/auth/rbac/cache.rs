//! In-memory cache of preset role and policy templates.
//!
//! # Purpose
//! Keeps the live (non-deleted) preset templates keyed by
//! `"<entity>_<accessType>_<role>"` so the resolver can render roles without a
//! database round trip.
//!
//! # Concurrency
//! Reads go straight to the `DashMap`s. Syncs are serialized by a mutex and
//! replace entries one key at a time, then drop keys that disappeared.
use crate::model::{PolicyCacheDetailObj, RoleCacheDetailObj};
use crate::store::{AuthStore, StoreResult};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};

pub fn cache_key(entity: &str, access_type: &str, role: &str) -> String {
    format!("{entity}_{access_type}_{role}")
}

pub struct RbacDataCache {
    store: Arc<dyn AuthStore>,
    role_data: DashMap<String, RoleCacheDetailObj>,
    policy_data: DashMap<String, PolicyCacheDetailObj>,
    sync_lock: Mutex<()>,
}

impl RbacDataCache {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self {
            store,
            role_data: DashMap::new(),
            policy_data: DashMap::new(),
            sync_lock: Mutex::new(()),
        }
    }

    /// Reload role templates from storage.
    pub async fn sync_role_data_cache(&self) -> StoreResult<()> {
        let _guard = self.sync_lock.lock().await;
        let rows = self.store.list_role_data().await?;
        let mut live = HashSet::with_capacity(rows.len());
        for row in rows {
            let key = cache_key(&row.entity, &row.access_type, &row.role);
            live.insert(key.clone());
            self.role_data.insert(key, row.role_data);
        }
        self.role_data.retain(|key, _| live.contains(key));
        tracing::debug!(count = live.len(), "role template cache synced");
        Ok(())
    }

    /// Reload policy templates from storage.
    pub async fn sync_policy_cache(&self) -> StoreResult<()> {
        let _guard = self.sync_lock.lock().await;
        let rows = self.store.list_policy_data().await?;
        let mut live = HashSet::with_capacity(rows.len());
        for row in rows {
            let key = cache_key(&row.entity, &row.access_type, &row.role);
            live.insert(key.clone());
            self.policy_data.insert(key, row.policy_data);
        }
        self.policy_data.retain(|key, _| live.contains(key));
        tracing::debug!(count = live.len(), "policy template cache synced");
        Ok(())
    }

    pub async fn sync(&self) -> StoreResult<()> {
        self.sync_role_data_cache().await?;
        self.sync_policy_cache().await
    }

    /// Run a sync on a background task; the receiver resolves when it finishes.
    pub fn spawn_sync(self: &Arc<Self>) -> oneshot::Receiver<StoreResult<()>> {
        let (tx, rx) = oneshot::channel();
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let result = cache.sync().await;
            if let Err(err) = &result {
                tracing::error!(error = %err, "preset cache sync failed");
            }
            let _ = tx.send(result);
        });
        rx
    }

    pub fn role_template(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> Option<RoleCacheDetailObj> {
        self.role_data
            .get(&cache_key(entity, access_type, role))
            .map(|entry| entry.value().clone())
    }

    pub fn policy_template(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> Option<PolicyCacheDetailObj> {
        self.policy_data
            .get(&cache_key(entity, access_type, role))
            .map(|entry| entry.value().clone())
    }

    /// Both templates of a preset, or `None` if either half is missing.
    pub fn get_default_role_and_policy(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> Option<(RoleCacheDetailObj, PolicyCacheDetailObj)> {
        Some((
            self.role_template(entity, access_type, role)?,
            self.policy_template(entity, access_type, role)?,
        ))
    }

    pub fn len(&self) -> usize {
        self.role_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.role_data.is_empty()
    }
}
