//! HTTP application wiring.
//!
//! # Purpose
//! Builds the shared application state from a store, runs the startup tasks
//! that must finish before serving, and composes the Axum router with the
//! trace and authorization layers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and testable.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::auth::middleware;
use crate::auth::oidc::OidcProvider;
use crate::auth::rbac::cache::RbacDataCache;
use crate::auth::rbac::enforcer::{Enforcer, PolicyEngine};
use crate::auth::session::SessionManager;
use crate::auth::token_cache::TokenCache;
use crate::config::AuthConfig;
use crate::observability;
use crate::service::preset_sync::PresetService;
use crate::service::resolver::RoleResolver;
use crate::service::role_group::RoleGroupService;
use crate::service::sso::SsoService;
use crate::service::user::UserService;
use crate::service::ActingUser;
use crate::store::{AuthStore, PolicyAdapter};
use anyhow::Context;
use axum::Router;
use axum::routing::{any, get, post, put};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub store: Arc<dyn AuthStore>,
    pub engine: Arc<dyn PolicyEngine>,
    pub cache: Arc<RbacDataCache>,
    pub users: UserService,
    pub groups: RoleGroupService,
    pub presets: Arc<PresetService>,
    pub sso: SsoService,
    pub sessions: Arc<SessionManager>,
    pub oidc: Arc<OidcProvider>,
    pub tokens: Arc<TokenCache>,
    pub http: reqwest::Client,
}

/// Wire services over `store` and load the policy engine from it.
///
/// # Errors
/// - The engine's initial policy load failed.
pub async fn build_state<S>(config: AuthConfig, store: Arc<S>) -> anyhow::Result<AppState>
where
    S: AuthStore + PolicyAdapter + 'static,
{
    let adapter: Arc<dyn PolicyAdapter> = store.clone();
    let engine: Arc<dyn PolicyEngine> = Arc::new(
        Enforcer::new(adapter, &config.enforcer)
            .await
            .context("load policy engine")?,
    );
    let store: Arc<dyn AuthStore> = store;
    let cache = Arc::new(RbacDataCache::new(store.clone()));
    let resolver = RoleResolver::new(store.clone(), cache.clone());
    let sessions = Arc::new(SessionManager::new(&config.dex, config.admin.clone()));
    let oidc = Arc::new(OidcProvider::new(
        config.dex.clone(),
        config.oidc_allowed_algorithms.clone(),
    ));
    let tokens = Arc::new(TokenCache::new(sessions.clone(), &config.admin));

    Ok(AppState {
        users: UserService::new(store.clone(), engine.clone(), resolver.clone()),
        groups: RoleGroupService::new(store.clone(), engine.clone(), resolver),
        presets: Arc::new(PresetService::new(
            store.clone(),
            engine.clone(),
            cache.clone(),
        )),
        sso: SsoService::new(store.clone(), oidc.clone(), tokens.clone()),
        config: Arc::new(config),
        store,
        engine,
        cache,
        sessions,
        oidc,
        tokens,
        http: reqwest::Client::new(),
    })
}

impl AppState {
    /// Run the tasks that must complete before the API serves traffic.
    ///
    /// # What it does
    /// Syncs the declared presets and warms the preset cache on background
    /// tasks and waits for both, then re-asserts the policy mirror and points
    /// the OIDC client at the active SSO config.
    ///
    /// # Errors
    /// - Any of the tasks failed or was dropped.
    pub async fn run_startup_tasks(&self) -> anyhow::Result<()> {
        // Step 1: presets and cache warm-up, concurrently.
        let presets = self.presets.spawn_sync();
        let warm_up = self.cache.spawn_sync();
        let written = presets.await.context("preset sync task dropped")??;
        warm_up.await.context("cache warm-up task dropped")??;
        tracing::info!(written, templates = self.cache.len(), "presets ready");

        // Step 2: mirror reconciliation.
        self.users
            .sync_orchestrator_to_casbin(&ActingUser::system())
            .await?;

        // Step 3: OIDC client.
        self.sso.reload_active().await?;
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route("/", get(api::system::liveness))
        .route("/health", get(api::system::health))
        .route("/login", get(api::session::login))
        .route("/auth/login", get(api::session::login))
        .route("/auth/callback", get(api::session::callback))
        .route("/refresh", get(api::session::refresh))
        .route("/api/v1/session", post(api::session::create_session))
        .route("/devtron/auth/verify", get(api::session::verify))
        .route("/register", post(api::session::register))
        .route(
            "/self-register/check",
            get(api::session::self_register_check),
        )
        .route(
            "/self-register/roles",
            get(api::sso::get_self_registration_roles).put(api::sso::set_self_registration_roles),
        )
        .route("/api/dex/*path", any(api::dex::proxy))
        .route(
            "/user",
            get(api::users::list_users)
                .post(api::users::create_user)
                .put(api::users::update_user),
        )
        .route(
            "/user/:id",
            get(api::users::get_user).delete(api::users::delete_user),
        )
        .route("/user/check/roles", get(api::users::check_roles))
        .route(
            "/user/update/trigger/terminal",
            put(api::users::update_trigger_terminal),
        )
        .route(
            "/user/sync/orchestratortocasbin",
            post(api::users::sync_orchestrator_to_casbin),
        )
        .route(
            "/user/role/group",
            get(api::role_groups::list_role_groups)
                .post(api::role_groups::create_role_group)
                .put(api::role_groups::update_role_group),
        )
        .route(
            "/user/role/group/:id",
            get(api::role_groups::get_role_group).delete(api::role_groups::delete_role_group),
        )
        .route(
            "/rbac/role",
            get(api::rbac_roles::list_roles)
                .post(api::rbac_roles::create_role)
                .put(api::rbac_roles::update_role),
        )
        .route("/rbac/role/:id", get(api::rbac_roles::get_role))
        .route("/sso", get(api::sso::get_sso_by_name))
        .route("/sso/create", post(api::sso::create_sso))
        .route("/sso/update", put(api::sso::update_sso))
        .route("/sso/list", get(api::sso::list_sso))
        .route("/sso/:id", get(api::sso::get_sso))
        .merge(utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authorize,
        ))
        .layer(trace_layer)
        .with_state(state)
}
