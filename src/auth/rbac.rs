//! RBAC module wiring and shared vocabulary.
//!
//! # Purpose
//! Exposes the key matchers, the Casbin-backed policy engine and its storage
//! adapter, preset template rendering, the builtin preset catalog, and the
//! preset template cache, plus the resource and action names handlers pass to
//! `enforce`.
pub mod adapter;
pub mod cache;
pub mod catalog;
pub mod enforcer;
pub mod matcher;
pub mod template;

// Compiled in; no model file ships alongside the binary.
pub const MODEL_CONF: &str = include_str!("rbac/model.conf");

pub const RESOURCE_GLOBAL: &str = "global";
pub const RESOURCE_USER: &str = "user";

pub const ACTION_GET: &str = "get";
pub const ACTION_CREATE: &str = "create";
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_DELETE: &str = "delete";
