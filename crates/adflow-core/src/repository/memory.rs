//! In-memory repository implementations backed by `DashMap`.
//!
//! Cheap to clone (handles share one map), so a test can keep a handle and
//! inspect what the engine wrote.

use std::sync::Arc;

use adflow_types::error::RepositoryError;
use adflow_types::workflow::{WorkflowResult, WorkflowState, WorkflowStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::checkpoint::CheckpointRepository;
use super::idempotency::{Claim, IdempotencyOutcome, IdempotencyRecord, IdempotencyRepository};

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointRepository {
    states: Arc<DashMap<String, WorkflowState>>,
}

impl MemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl CheckpointRepository for MemoryCheckpointRepository {
    async fn save(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        self.states.insert(state.request_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, request_id: &str) -> Result<Option<WorkflowState>, RepositoryError> {
        Ok(self.states.get(request_id).map(|s| s.value().clone()))
    }

    async fn delete(&self, request_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.states.remove(request_id).is_some())
    }

    async fn list_by_status(
        &self,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        let mut states: Vec<WorkflowState> = self
            .states
            .iter()
            .filter(|s| statuses.contains(&s.status))
            .map(|s| s.value().clone())
            .collect();
        states.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        Ok(states)
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let before = self.states.len();
        self.states
            .retain(|_, s| s.status == WorkflowStatus::Running || s.updated_at >= cutoff);
        Ok((before - self.states.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryIdempotencyRepository {
    records: Arc<DashMap<String, IdempotencyRecord>>,
}

impl MemoryIdempotencyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyRepository for MemoryIdempotencyRepository {
    async fn claim(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Claim, RepositoryError> {
        let fresh = IdempotencyRecord {
            request_id: request_id.to_string(),
            outcome: IdempotencyOutcome::InFlight,
            created_at: now,
            expires_at,
        };

        match self.records.entry(request_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(Claim::Claimed)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    slot.insert(fresh);
                    return Ok(Claim::Claimed);
                }
                match &slot.get().outcome {
                    IdempotencyOutcome::InFlight => Ok(Claim::InFlight),
                    IdempotencyOutcome::Completed { result } => Ok(Claim::Completed(result.clone())),
                }
            }
        }
    }

    async fn complete(
        &self,
        request_id: &str,
        result: &WorkflowResult,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let outcome = IdempotencyOutcome::Completed {
            result: result.clone(),
        };
        self.records
            .entry(request_id.to_string())
            .and_modify(|r| {
                r.outcome = outcome.clone();
                r.expires_at = expires_at;
            })
            .or_insert_with(|| IdempotencyRecord {
                request_id: request_id.to_string(),
                outcome: outcome.clone(),
                created_at: now,
                expires_at,
            });
        Ok(())
    }

    async fn release(&self, request_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.records.remove(request_id).is_some())
    }

    async fn get(&self, request_id: &str) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        Ok(self.records.get(request_id).map(|r| r.value().clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        Ok((before - self.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adflow_types::workflow::{WorkflowRequest, WorkflowType};
    use chrono::Duration;

    fn result(request_id: &str) -> WorkflowResult {
        WorkflowResult {
            request_id: request_id.into(),
            status: WorkflowStatus::Completed,
            dry_run: false,
            resources: vec![],
            rolled_back: vec![],
            orphaned: vec![],
            kept: vec![],
            failed_tasks: vec![],
            queries: Default::default(),
            tasks: vec![],
            cause: None,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_expiry() {
        let repo = MemoryIdempotencyRepository::new();
        let now = Utc::now();
        let later = now + Duration::hours(1);

        assert_eq!(repo.claim("r1", now, later).await.unwrap(), Claim::Claimed);
        assert_eq!(repo.claim("r1", now, later).await.unwrap(), Claim::InFlight);

        repo.complete("r1", &result("r1"), later).await.unwrap();
        assert_eq!(
            repo.claim("r1", now, later).await.unwrap(),
            Claim::Completed(result("r1"))
        );

        // Past expiry the key is free again.
        let after = later + Duration::seconds(1);
        assert_eq!(
            repo.claim("r1", after, after + Duration::hours(1)).await.unwrap(),
            Claim::Claimed
        );
    }

    #[tokio::test]
    async fn purge_expired_removes_only_stale_records() {
        let repo = MemoryIdempotencyRepository::new();
        let now = Utc::now();
        repo.claim("old", now, now + Duration::minutes(1)).await.unwrap();
        repo.claim("new", now, now + Duration::hours(1)).await.unwrap();

        let purged = repo.purge_expired(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get("old").await.unwrap().is_none());
        assert!(repo.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn checkpoint_purge_keeps_running_states() {
        let repo = MemoryCheckpointRepository::new();
        let request = |id: &str| WorkflowRequest {
            request_id: id.into(),
            workflow_type: WorkflowType::Update,
            payload: Default::default(),
            options: Default::default(),
        };

        let running = WorkflowState::new(request("running"), vec![]);
        let mut done = WorkflowState::new(request("done"), vec![]);
        done.status = WorkflowStatus::Completed;
        repo.save(&running).await.unwrap();
        repo.save(&done).await.unwrap();

        let purged = repo
            .purge_finished_before(Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.load("running").await.unwrap().is_some());
        assert_eq!(
            repo.list_by_status(&[WorkflowStatus::Running]).await.unwrap().len(),
            1
        );
    }
}
