//! SSO configuration and self-registration settings.
//!
//! Saving an active configuration deactivates the others and hot-reloads the
//! OIDC client against `<url>/api/dex`; the cached admin token is dropped at
//! the same time.
use super::{ActingUser, ServiceError, ServiceResult, forbidden};
use crate::auth::oidc::OidcProvider;
use crate::auth::token_cache::TokenCache;
use crate::model::SsoLoginModel;
use crate::store::AuthStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct SsoService {
    store: Arc<dyn AuthStore>,
    oidc: Arc<OidcProvider>,
    tokens: Arc<TokenCache>,
}

fn validate(model: &SsoLoginModel) -> ServiceResult<()> {
    if model.name.trim().is_empty() {
        return Err(ServiceError::BadRequest("sso name is required".to_string()));
    }
    if model.active && model.url.trim().is_empty() {
        return Err(ServiceError::BadRequest(
            "an active sso config needs a url".to_string(),
        ));
    }
    Ok(())
}

impl SsoService {
    pub fn new(store: Arc<dyn AuthStore>, oidc: Arc<OidcProvider>, tokens: Arc<TokenCache>) -> Self {
        Self {
            store,
            oidc,
            tokens,
        }
    }

    /// Point the OIDC client at the active configuration, if any.
    pub async fn reload_active(&self) -> ServiceResult<()> {
        let active = self.store.active_sso().await?;
        self.oidc.reload(active.as_ref().map(|m| m.url.as_str())).await;
        self.tokens.invalidate();
        Ok(())
    }

    /// # Errors
    /// - `Forbidden` for non-super-admin actors.
    /// - `BadRequest` for an empty name, or an active config without url.
    /// - `Conflict` when the name is taken.
    pub async fn create(
        &self,
        mut model: SsoLoginModel,
        actor: &ActingUser,
    ) -> ServiceResult<SsoLoginModel> {
        if !actor.super_admin {
            return Err(forbidden());
        }
        validate(&model)?;
        model.id = 0;
        model.name = model.name.trim().to_string();
        let saved = self.store.save_sso(model, actor.id).await?;
        tracing::info!(name = %saved.name, active = saved.active, "sso config created");
        if saved.active {
            self.reload_active().await?;
        }
        Ok(saved)
    }

    /// # Errors
    /// - `Forbidden`, `BadRequest` as for [`SsoService::create`].
    /// - `NotFound` for an unknown id.
    pub async fn update(
        &self,
        model: SsoLoginModel,
        actor: &ActingUser,
    ) -> ServiceResult<SsoLoginModel> {
        if !actor.super_admin {
            return Err(forbidden());
        }
        validate(&model)?;
        let previous = self.store.get_sso(model.id).await?;
        let saved = self.store.save_sso(model, actor.id).await?;
        tracing::info!(name = %saved.name, active = saved.active, "sso config updated");
        if saved.active || previous.active {
            self.reload_active().await?;
        }
        Ok(saved)
    }

    pub async fn list(&self) -> ServiceResult<Vec<SsoLoginModel>> {
        Ok(self.store.list_sso().await?)
    }

    pub async fn get(&self, id: i32) -> ServiceResult<SsoLoginModel> {
        Ok(self.store.get_sso(id).await?)
    }

    pub async fn get_by_name(&self, name: &str) -> ServiceResult<SsoLoginModel> {
        self.store
            .get_sso_by_name(name.trim())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("sso config {name}")))
    }

    /// Self-registration is on iff at least one role is configured.
    pub async fn self_registration_enabled(&self) -> ServiceResult<bool> {
        Ok(!self.store.self_registration_roles().await?.is_empty())
    }

    pub async fn self_registration_roles(&self) -> ServiceResult<Vec<String>> {
        Ok(self.store.self_registration_roles().await?)
    }

    /// Replace the self-registration role set; an empty set disables it.
    pub async fn set_self_registration_roles(
        &self,
        roles: Vec<String>,
        actor: &ActingUser,
    ) -> ServiceResult<Vec<String>> {
        if !actor.super_admin {
            return Err(forbidden());
        }
        let mut cleaned: Vec<String> = Vec::new();
        for role in roles {
            let role = role.trim().to_string();
            if !role.is_empty() && !cleaned.contains(&role) {
                cleaned.push(role);
            }
        }
        self.store
            .set_self_registration_roles(&cleaned, actor.id)
            .await?;
        tracing::info!(roles = cleaned.len(), "self-registration roles updated");
        Ok(cleaned)
    }
}
