//! Auth HTTP API module.
//!
//! # Purpose
//! Route handler modules, the response envelope, request/response payloads,
//! and the OpenAPI document.
pub mod dex;
pub mod error;
pub mod openapi;
pub mod rbac_roles;
pub mod role_groups;
pub mod session;
pub mod sso;
pub mod system;
pub mod types;
pub mod users;
