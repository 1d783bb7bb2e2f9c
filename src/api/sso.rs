//! SSO configuration and self-registration role handlers.
//!
//! # Purpose
//! Manages the `sso_login` rows. Saving an active row hot-reloads the OIDC
//! client; writes are super-admin only.
use crate::api::error::{ApiError, Envelope, api_bad_request, ok};
use crate::api::types::{NameQuery, SelfRegistrationRoles};
use crate::app::AppState;
use crate::model::SsoLoginModel;
use crate::service::ActingUser;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};

#[utoipa::path(
    post,
    path = "/sso/create",
    tag = "sso",
    request_body = SsoLoginModel,
    responses(
        (status = 200, description = "Created config", body = SsoLoginModel),
        (status = 403, description = "Super-admin only", body = crate::api::types::ErrorBody),
        (status = 409, description = "Name already taken", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn create_sso(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<SsoLoginModel>,
) -> Result<Json<Envelope<SsoLoginModel>>, ApiError> {
    Ok(ok(state.sso.create(body, &actor).await?))
}

#[utoipa::path(
    put,
    path = "/sso/update",
    tag = "sso",
    request_body = SsoLoginModel,
    responses(
        (status = 200, description = "Updated config", body = SsoLoginModel),
        (status = 403, description = "Super-admin only", body = crate::api::types::ErrorBody),
        (status = 404, description = "Unknown id", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn update_sso(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<SsoLoginModel>,
) -> Result<Json<Envelope<SsoLoginModel>>, ApiError> {
    Ok(ok(state.sso.update(body, &actor).await?))
}

#[utoipa::path(
    get,
    path = "/sso/list",
    tag = "sso",
    responses(
        (status = 200, description = "Every config", body = [SsoLoginModel])
    )
)]
pub(crate) async fn list_sso(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<SsoLoginModel>>>, ApiError> {
    Ok(ok(state.sso.list().await?))
}

#[utoipa::path(
    get,
    path = "/sso/{id}",
    tag = "sso",
    params(
        ("id" = i32, Path, description = "SSO config id")
    ),
    responses(
        (status = 200, description = "Config", body = SsoLoginModel),
        (status = 404, description = "Unknown id", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn get_sso(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<Json<Envelope<SsoLoginModel>>, ApiError> {
    Ok(ok(state.sso.get(id).await?))
}

#[utoipa::path(
    get,
    path = "/sso",
    tag = "sso",
    params(NameQuery),
    responses(
        (status = 200, description = "Config with this name", body = SsoLoginModel),
        (status = 400, description = "Missing name", body = crate::api::types::ErrorBody),
        (status = 404, description = "Unknown name", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn get_sso_by_name(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Envelope<SsoLoginModel>>, ApiError> {
    let name = query
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| api_bad_request("name is required"))?;
    Ok(ok(state.sso.get_by_name(name).await?))
}

#[utoipa::path(
    get,
    path = "/self-register/roles",
    tag = "sso",
    responses(
        (status = 200, description = "Roles granted on self-registration", body = SelfRegistrationRoles)
    )
)]
pub(crate) async fn get_self_registration_roles(
    State(state): State<AppState>,
) -> Result<Json<Envelope<SelfRegistrationRoles>>, ApiError> {
    let roles = state.sso.self_registration_roles().await?;
    Ok(ok(SelfRegistrationRoles { roles }))
}

#[utoipa::path(
    put,
    path = "/self-register/roles",
    tag = "sso",
    request_body = SelfRegistrationRoles,
    responses(
        (status = 200, description = "Saved role set; empty disables self-registration", body = SelfRegistrationRoles),
        (status = 403, description = "Super-admin only", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn set_self_registration_roles(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<SelfRegistrationRoles>,
) -> Result<Json<Envelope<SelfRegistrationRoles>>, ApiError> {
    let roles = state
        .sso
        .set_self_registration_roles(body.roles, &actor)
        .await?;
    Ok(ok(SelfRegistrationRoles { roles }))
}
