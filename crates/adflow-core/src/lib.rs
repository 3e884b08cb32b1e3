//! Workflow orchestration core and capability trait definitions for adflow.
//!
//! This crate defines the "ports" (platform capability traits and repository
//! traits) that the infrastructure layer implements, plus the engine that
//! drives workflows against them. It depends only on `adflow-types` -- never
//! on `adflow-infra` or any database/HTTP crate.

pub mod asset_cache;
pub mod platform;
pub mod repository;
pub mod workflow;
