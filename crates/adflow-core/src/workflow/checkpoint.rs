//! Durable checkpoint manager for workflow state.
//!
//! Wraps a [`CheckpointRepository`] to provide the engine's persistence API.
//! The whole [`WorkflowState`] is written after every task transition so a
//! crashed workflow can resume from its last recorded state.

use adflow_types::workflow::{WorkflowState, WorkflowStatus};
use chrono::{DateTime, Utc};

use crate::repository::checkpoint::CheckpointRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable checkpoints for workflows.
///
/// Generic over `R: CheckpointRepository` so it works with any storage
/// backend (SQLite, in-memory, etc.).
pub struct CheckpointManager<R: CheckpointRepository> {
    repo: R,
}

impl<R: CheckpointRepository> CheckpointManager<R> {
    /// Create a new checkpoint manager backed by the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Persist `state`, stamping `updated_at`.
    pub async fn checkpoint(&self, state: &mut WorkflowState) -> Result<(), CheckpointError> {
        state.updated_at = Utc::now();
        self.repo
            .save(state)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            request_id = %state.request_id,
            status = state.status.as_str(),
            "checkpointed workflow state"
        );
        Ok(())
    }

    /// Load the last checkpoint for `request_id`.
    pub async fn restore(&self, request_id: &str) -> Result<WorkflowState, CheckpointError> {
        self.repo
            .load(request_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or_else(|| CheckpointError::NotFound(request_id.to_string()))
    }

    /// Load the last checkpoint for `request_id`, if any.
    pub async fn find(&self, request_id: &str) -> Result<Option<WorkflowState>, CheckpointError> {
        self.repo
            .load(request_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Workflows that were interrupted: still running, or failed with a
    /// rollback that never finished.
    pub async fn interrupted(&self) -> Result<Vec<WorkflowState>, CheckpointError> {
        let states = self
            .repo
            .list_by_status(&[WorkflowStatus::Running, WorkflowStatus::Failed])
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        Ok(states
            .into_iter()
            .filter(|s| s.status == WorkflowStatus::Running || s.rollback.is_none())
            .collect())
    }

    pub async fn purge(&self, request_id: &str) -> Result<bool, CheckpointError> {
        self.repo
            .delete(request_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Delete finished checkpoints last updated before `cutoff`.
    pub async fn purge_finished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CheckpointError> {
        let purged = self
            .repo
            .purge_finished_before(cutoff)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        if purged > 0 {
            tracing::info!(purged, "purged expired checkpoints");
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// No checkpoint exists for the request.
    #[error("workflow not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryCheckpointRepository;
    use adflow_types::workflow::{RollbackReport, WorkflowRequest, WorkflowType};

    fn state(id: &str) -> WorkflowState {
        WorkflowState::new(
            WorkflowRequest {
                request_id: id.into(),
                workflow_type: WorkflowType::Update,
                payload: Default::default(),
                options: Default::default(),
            },
            vec![],
        )
    }

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("connection lost".to_string());
        assert!(err.to_string().contains("connection lost"));

        let err = CheckpointError::NotFound("r1".to_string());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn restore_missing_is_not_found() {
        let manager = CheckpointManager::new(MemoryCheckpointRepository::new());
        assert!(matches!(
            manager.restore("nope").await,
            Err(CheckpointError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn interrupted_skips_finished_rollbacks() {
        let manager = CheckpointManager::new(MemoryCheckpointRepository::new());

        let mut running = state("running");
        let mut failed_mid_rollback = state("crashed");
        failed_mid_rollback.status = WorkflowStatus::Failed;
        let mut failed_with_orphans = state("orphans");
        failed_with_orphans.status = WorkflowStatus::Failed;
        failed_with_orphans.rollback = Some(RollbackReport::default());

        for s in [&mut running, &mut failed_mid_rollback, &mut failed_with_orphans] {
            manager.checkpoint(s).await.unwrap();
        }

        let ids: Vec<String> = manager
            .interrupted()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.request_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"running".to_string()));
        assert!(ids.contains(&"crashed".to_string()));
    }
}
