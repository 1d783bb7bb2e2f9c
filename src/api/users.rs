//! User handlers.
//!
//! # Purpose
//! CRUD over users and their grants, the caller's role check, the terminal
//! access preset rewrite, and the on-demand mirror sync. Authorization is
//! decided in the services from the [`ActingUser`] the middleware injects.
use crate::api::error::{ApiError, Envelope, ok};
use crate::api::types::TerminalAccessUpdate;
use crate::app::AppState;
use crate::model::UserInfo;
use crate::service::ActingUser;
use axum::extract::{Path, State};
use axum::{Extension, Json};

#[utoipa::path(
    get,
    path = "/user",
    tag = "users",
    responses(
        (status = 200, description = "Active users with their role filters", body = [UserInfo])
    )
)]
pub(crate) async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<UserInfo>>>, ApiError> {
    Ok(ok(state.users.get_all().await?))
}

#[utoipa::path(
    post,
    path = "/user",
    tag = "users",
    request_body = UserInfo,
    responses(
        (status = 200, description = "One entry per email in `email_id`", body = [UserInfo]),
        (status = 400, description = "Malformed emails or unknown groups", body = crate::api::types::ErrorBody),
        (status = 403, description = "Caller may not grant a requested role", body = crate::api::types::ErrorBody)
    )
)]
/// Create users, or merge grants into existing active ones.
///
/// # Errors
/// - 400 for malformed emails or unknown group names.
/// - 403 when the caller may not grant a filter or super-admin.
pub(crate) async fn create_user(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<UserInfo>,
) -> Result<Json<Envelope<Vec<UserInfo>>>, ApiError> {
    let created = state.users.create_user(body, &actor).await?;
    Ok(ok(created))
}

#[utoipa::path(
    put,
    path = "/user",
    tag = "users",
    request_body = UserInfo,
    responses(
        (status = 200, description = "Updated user", body = UserInfo),
        (status = 403, description = "Caller may not manage a role", body = crate::api::types::ErrorBody),
        (status = 404, description = "User not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn update_user(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
    Json(body): Json<UserInfo>,
) -> Result<Json<Envelope<UserInfo>>, ApiError> {
    Ok(ok(state.users.update_user(body, &actor).await?))
}

#[utoipa::path(
    get,
    path = "/user/{id}",
    tag = "users",
    params(
        ("id" = i32, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User with its role filters", body = UserInfo),
        (status = 404, description = "Missing or inactive user", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn get_user(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<Json<Envelope<UserInfo>>, ApiError> {
    Ok(ok(state.users.get_by_id(id).await?))
}

#[utoipa::path(
    delete,
    path = "/user/{id}",
    tag = "users",
    params(
        ("id" = i32, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User deactivated", body = bool),
        (status = 400, description = "Seeded users cannot be deleted", body = crate::api::types::ErrorBody),
        (status = 404, description = "Missing or inactive user", body = crate::api::types::ErrorBody)
    )
)]
/// Soft-delete a user and drop its policy edges.
///
/// # Errors
/// - 400 for the seeded system and admin users.
/// - 403 when the caller may not revoke one of the user's roles.
/// - 404 for a missing or inactive user.
pub(crate) async fn delete_user(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
) -> Result<Json<Envelope<bool>>, ApiError> {
    state.users.delete_user(id, &actor).await?;
    Ok(ok(true))
}

#[utoipa::path(
    get,
    path = "/user/check/roles",
    tag = "users",
    responses(
        (status = 200, description = "Caller's direct roles and super-admin flag", body = UserInfo)
    )
)]
pub(crate) async fn check_roles(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
) -> Result<Json<Envelope<UserInfo>>, ApiError> {
    Ok(ok(state.users.check_user_roles(&actor.email).await?))
}

#[utoipa::path(
    put,
    path = "/user/update/trigger/terminal",
    tag = "users",
    responses(
        (status = 200, description = "Whether the trigger preset changed", body = TerminalAccessUpdate),
        (status = 403, description = "Super-admin only", body = crate::api::types::ErrorBody)
    )
)]
/// Add terminal exec to the app trigger preset and every trigger role.
///
/// # Errors
/// - 403 for non-super-admin callers.
pub(crate) async fn update_trigger_terminal(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
) -> Result<Json<Envelope<TerminalAccessUpdate>>, ApiError> {
    let updated = state
        .presets
        .update_trigger_policy_for_terminal_access(&actor)
        .await?;
    Ok(ok(TerminalAccessUpdate { updated }))
}

#[utoipa::path(
    post,
    path = "/user/sync/orchestratortocasbin",
    tag = "users",
    responses(
        (status = 200, description = "Mirror re-asserted", body = bool),
        (status = 403, description = "Super-admin only", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn sync_orchestrator_to_casbin(
    State(state): State<AppState>,
    Extension(actor): Extension<ActingUser>,
) -> Result<Json<Envelope<bool>>, ApiError> {
    state.users.sync_orchestrator_to_casbin(&actor).await?;
    Ok(ok(true))
}
