//! OpenAPI schema aggregation for the auth API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document served
//! at `/openapi.json` and rendered by the Swagger UI at `/docs`.
use crate::api::types::{
    ErrorBody, ErrorDetail, HealthStatus, LoginRequest, SelfRegisterCheck,
    SelfRegistrationRoles, TerminalAccessUpdate, TokenResponse,
};
use crate::api::{dex, rbac_roles, role_groups, session, sso, system, users};
use crate::model::{
    RbacPolicyResource, RbacRoleDto, RoleFilter, RoleFilterStatus, RoleGroupInfo, SsoLoginModel,
    UserInfo, UserType,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "orchestrator-auth",
        version = "v1",
        description = "Orchestrator identity, authentication, and authorization API"
    ),
    paths(
        system::liveness,
        system::health,
        session::login,
        session::callback,
        session::refresh,
        session::create_session,
        session::verify,
        session::register,
        session::self_register_check,
        dex::proxy,
        users::list_users,
        users::create_user,
        users::update_user,
        users::get_user,
        users::delete_user,
        users::check_roles,
        users::update_trigger_terminal,
        users::sync_orchestrator_to_casbin,
        role_groups::list_role_groups,
        role_groups::create_role_group,
        role_groups::update_role_group,
        role_groups::get_role_group,
        role_groups::delete_role_group,
        rbac_roles::list_roles,
        rbac_roles::get_role,
        rbac_roles::create_role,
        rbac_roles::update_role,
        sso::create_sso,
        sso::update_sso,
        sso::list_sso,
        sso::get_sso,
        sso::get_sso_by_name,
        sso::get_self_registration_roles,
        sso::set_self_registration_roles
    ),
    components(schemas(
        ErrorBody,
        ErrorDetail,
        HealthStatus,
        LoginRequest,
        TokenResponse,
        SelfRegisterCheck,
        SelfRegistrationRoles,
        TerminalAccessUpdate,
        UserInfo,
        UserType,
        RoleFilter,
        RoleFilterStatus,
        RoleGroupInfo,
        RbacRoleDto,
        RbacPolicyResource,
        SsoLoginModel
    )),
    tags(
        (name = "system", description = "Liveness and health"),
        (name = "session", description = "Login, callback, refresh, and self-registration"),
        (name = "users", description = "Users and their grants"),
        (name = "role-groups", description = "Role groups"),
        (name = "rbac", description = "Preset role definitions"),
        (name = "sso", description = "SSO configuration")
    )
)]
pub struct ApiDoc;
