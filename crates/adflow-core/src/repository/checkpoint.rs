//! Checkpoint repository trait definition.
//!
//! Stores one [`WorkflowState`] snapshot per request id. The infrastructure
//! layer (adflow-infra) implements this trait with SQLite persistence; an
//! in-memory implementation lives in [`super::memory`].

use adflow_types::error::RepositoryError;
use adflow_types::workflow::{WorkflowState, WorkflowStatus};
use chrono::{DateTime, Utc};

/// Repository trait for durable workflow checkpoints.
///
/// Implementations must round-trip a `WorkflowState` losslessly.
pub trait CheckpointRepository: Send + Sync {
    /// Insert or replace the snapshot for `state.request_id`.
    fn save(
        &self,
        state: &WorkflowState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load(
        &self,
        request_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowState>, RepositoryError>> + Send;

    /// Delete a snapshot. Returns `true` if it existed.
    fn delete(
        &self,
        request_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All snapshots currently in one of `statuses`, oldest first.
    fn list_by_status(
        &self,
        statuses: &[WorkflowStatus],
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowState>, RepositoryError>> + Send;

    /// Delete finished snapshots last updated before `cutoff`. Running
    /// snapshots are never purged here. Returns the number deleted.
    fn purge_finished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
