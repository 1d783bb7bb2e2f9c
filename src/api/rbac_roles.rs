//! Custom preset role handlers (`/rbac/role`).
//!
//! Reads are open to every authenticated caller; writes are super-admin only
//! and enforced by the preset service.
use crate::api::error::{ApiError, Envelope, ok};
use crate::app::AppState;
use crate::model::RbacRoleDto;
use crate::service::ActingUser;
use axum::extract::{Path, State};
use axum::{Extension, Json};

#[utoipa::path(
    get,
    path = "/rbac/role",
    tag = "rbac",
    responses(
        (status = 200, description = "Every live preset role", body = [RbacRoleDto])
    )
)]
pub(crate) async fn list_roles(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<RbacRoleDto>>>, ApiError> {
    Ok(ok(state.presets.get_all_default_roles().await?))
}

#[utoipa::path(
    get,
    path = "/rbac/role/{id}",
    tag = "rbac",
    params(
        ("id" = i32, Path, description = "Preset role id")
    ),
    responses(
        (status = 200, description = "Preset role", body = RbacRoleDto),
        (status = 404, description = "Unknown id", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn get_role(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<Json<Envelope<RbacRoleDto>>, ApiError> {
    Ok(ok(state.presets.get_default_role(id).await?))
}

#[utoipa::path(
    post,
    path = "/rbac/role",
    tag = "rbac",
    request_body = RbacRoleDto,
    responses(
        (status = 200, description = "Created preset role", body = RbacRoleDto),
        (status = 400, description = "Invalid definition", body = crate::api::types::ErrorBody),
        (status = 403, description = "Super-admin only", body = crate::api::types::ErrorBody),
        (status = 409, description = "Preset already exists", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn create_role(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<RbacRoleDto>,
) -> Result<Json<Envelope<RbacRoleDto>>, ApiError> {
    Ok(ok(state.presets.create_default_role(body, &actor).await?))
}

#[utoipa::path(
    put,
    path = "/rbac/role",
    tag = "rbac",
    request_body = RbacRoleDto,
    responses(
        (status = 200, description = "Updated preset role", body = RbacRoleDto),
        (status = 400, description = "Invalid definition or renamed preset", body = crate::api::types::ErrorBody),
        (status = 403, description = "Super-admin only", body = crate::api::types::ErrorBody),
        (status = 404, description = "Unknown id", body = crate::api::types::ErrorBody)
    )
)]
/// Update a custom preset role.
///
/// # What it does
/// Rewrites the preset's policy template; with
/// `updatePoliciesForExistingProvidedRoles` the policy diff is pushed to
/// every role rendered from it.
pub(crate) async fn update_role(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<RbacRoleDto>,
) -> Result<Json<Envelope<RbacRoleDto>>, ApiError> {
    Ok(ok(state.presets.update_default_role(body, &actor).await?))
}
