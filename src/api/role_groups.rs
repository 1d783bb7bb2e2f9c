//! Role-group handlers.
use crate::api::error::{ApiError, Envelope, ok};
use crate::api::types::NameQuery;
use crate::app::AppState;
use crate::model::RoleGroupInfo;
use crate::service::ActingUser;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};

#[utoipa::path(
    get,
    path = "/user/role/group",
    tag = "role-groups",
    params(NameQuery),
    responses(
        (status = 200, description = "Active groups, filtered by name when given", body = [RoleGroupInfo])
    )
)]
/// List active role groups; `?name=` narrows to a case-insensitive substring match.
pub(crate) async fn list_role_groups(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Envelope<Vec<RoleGroupInfo>>>, ApiError> {
    let groups = match query.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => state.groups.fetch_role_groups_by_name(name).await?,
        _ => state.groups.fetch_role_groups().await?,
    };
    Ok(ok(groups))
}

#[utoipa::path(
    post,
    path = "/user/role/group",
    tag = "role-groups",
    request_body = RoleGroupInfo,
    responses(
        (status = 200, description = "Created group", body = RoleGroupInfo),
        (status = 400, description = "Invalid name", body = crate::api::types::ErrorBody),
        (status = 409, description = "Name already taken", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn create_role_group(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<RoleGroupInfo>,
) -> Result<Json<Envelope<RoleGroupInfo>>, ApiError> {
    Ok(ok(state.groups.create_role_group(body, &actor).await?))
}

#[utoipa::path(
    put,
    path = "/user/role/group",
    tag = "role-groups",
    request_body = RoleGroupInfo,
    responses(
        (status = 200, description = "Updated group", body = RoleGroupInfo),
        (status = 404, description = "Group not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn update_role_group(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<RoleGroupInfo>,
) -> Result<Json<Envelope<RoleGroupInfo>>, ApiError> {
    Ok(ok(state.groups.update_role_group(body, &actor).await?))
}

#[utoipa::path(
    get,
    path = "/user/role/group/{id}",
    tag = "role-groups",
    params(
        ("id" = i32, Path, description = "Role group id")
    ),
    responses(
        (status = 200, description = "Group with its role filters", body = RoleGroupInfo),
        (status = 404, description = "Group not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn get_role_group(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<Json<Envelope<RoleGroupInfo>>, ApiError> {
    Ok(ok(state.groups.fetch_role_group_by_id(id).await?))
}

#[utoipa::path(
    delete,
    path = "/user/role/group/{id}",
    tag = "role-groups",
    params(
        ("id" = i32, Path, description = "Role group id")
    ),
    responses(
        (status = 200, description = "Group deactivated", body = bool),
        (status = 404, description = "Group not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn delete_role_group(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
) -> Result<Json<Envelope<bool>>, ApiError> {
    state.groups.delete_role_group(id, &actor).await?;
    Ok(ok(true))
}
