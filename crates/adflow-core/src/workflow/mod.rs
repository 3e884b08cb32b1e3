//! Workflow orchestration: planning, scheduling, retries, checkpoints and
//! rollback.
//!
//! - [`plan`] turns a request into a dependency graph of tasks.
//! - [`dag`] validates the graph and decides which tasks are ready.
//! - [`rate_limit`] and [`retry`] wrap every platform call.
//! - [`task_executor`] performs one task against the platform.
//! - [`checkpoint`] and [`idempotency`] persist state and results.
//! - [`rollback`] undoes a failed workflow.
//! - [`engine`] ties them together.

pub mod checkpoint;
pub mod dag;
pub mod engine;
pub mod idempotency;
pub mod plan;
pub mod rate_limit;
pub mod retry;
pub mod rollback;
pub mod task_executor;

#[cfg(test)]
pub(crate) mod testing;
