//! Shared domain types for adflow.
//!
//! Workflow requests, tasks, checkpointed state, results, configuration and
//! the normalized collaborator error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror, sha2.

pub mod config;
pub mod error;
pub mod workflow;
