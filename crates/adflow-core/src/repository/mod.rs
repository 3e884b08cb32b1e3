//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (adflow-infra) implements. In-memory implementations live in [`memory`]
//! for tests and ephemeral runs.

pub mod checkpoint;
pub mod idempotency;
pub mod memory;
