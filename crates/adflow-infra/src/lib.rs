//! Infrastructure layer for adflow.
//!
//! Contains implementations of the ports defined in `adflow-core`: SQLite
//! checkpoint and idempotency storage, the Graph API adapter for the ad
//! platform capabilities, and configuration loading.

pub mod config;
pub mod graph;
pub mod sqlite;
