//! Orchestrator identity, authentication, and authorization library crate.
//!
//! # Purpose
//! Exposes the policy engine, the identity services, the session layer, the
//! HTTP API surface, configuration, and the storage implementations for use
//! by the binary and tests.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod model;
pub mod observability;
pub mod service;
pub mod store;
