//! Authentication and authorization modules.
//!
//! # Purpose
//! Groups the policy engine and preset templates, the OIDC client, session
//! tokens, the admin token cache, and the request middleware.
pub mod middleware;
pub mod oidc;
pub mod rbac;
pub mod session;
pub mod token_cache;
