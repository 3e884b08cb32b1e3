//! SQLite checkpoint repository.
//!
//! Implements `CheckpointRepository` from `adflow-core`. The whole
//! `WorkflowState` is stored as a JSON blob; status and timestamps are
//! duplicated into columns for listing and purging.

use adflow_core::repository::checkpoint::CheckpointRepository;
use adflow_types::error::RepositoryError;
use adflow_types::workflow::{WorkflowState, WorkflowStatus};
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::format_datetime;
use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointRepository`.
pub struct SqliteCheckpointRepository {
    pool: DatabasePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn decode_state(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowState, RepositoryError> {
    let state: String = row
        .try_get("state")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&state)
        .map_err(|e| RepositoryError::Query(format!("invalid checkpoint JSON: {e}")))
}

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        let state_json = serde_json::to_string(state)
            .map_err(|e| RepositoryError::Query(format!("serialize checkpoint: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_checkpoints
               (request_id, workflow_type, status, state, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(request_id) DO UPDATE SET
                 status = excluded.status,
                 state = excluded.state,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&state.request_id)
        .bind(state.request.workflow_type.as_str())
        .bind(state.status.as_str())
        .bind(&state_json)
        .bind(format_datetime(&state.created_at))
        .bind(format_datetime(&state.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load(&self, request_id: &str) -> Result<Option<WorkflowState>, RepositoryError> {
        let row = sqlx::query("SELECT state FROM workflow_checkpoints WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode_state).transpose()
    }

    async fn delete(&self, request_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_checkpoints WHERE request_id = ?")
            .bind(request_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_status(
        &self,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT state FROM workflow_checkpoints WHERE status IN ({placeholders}) ORDER BY created_at ASC"
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode_state).collect()
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM workflow_checkpoints WHERE status != ? AND updated_at < ?",
        )
        .bind(WorkflowStatus::Running.as_str())
        .bind(format_datetime(&cutoff))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;
    use adflow_types::workflow::{
        CreatedResource, EntityType, OrphanedResource, RollbackReport, Task, TaskKind,
        TaskOutput, TaskPayload, TaskStatus, WorkflowRequest,
    };
    use std::collections::BTreeSet;

    async fn repo() -> (SqliteCheckpointRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        (SqliteCheckpointRepository::new(pool), dir)
    }

    fn request(id: &str) -> WorkflowRequest {
        WorkflowRequest::from_json(&format!(
            r#"{{
                "request_id": "{id}",
                "workflow_type": "full_hierarchy",
                "payload": {{
                    "campaign": {{"key": "c", "fields": {{"name": "Spring", "objective": "OUTCOME_SALES"}}}},
                    "ad_sets": [{{"key": "s", "fields": {{"name": "S", "daily_budget": 5000}}}}]
                }},
                "options": {{"priority": "high", "timeout_secs": 600}}
            }}"#
        ))
        .unwrap()
    }

    /// A state exercising every nested type: results, errors, resources and
    /// a rollback report.
    fn full_state(id: &str) -> WorkflowState {
        let campaign = CreatedResource {
            resource_type: EntityType::Campaign,
            external_id: "120200000001".into(),
            parent_id: None,
            created_at: Utc::now(),
            task_id: "campaign:c".into(),
            keep: false,
        };

        let mut done = Task::new(
            "campaign:c",
            TaskKind::CreateEntity,
            BTreeSet::new(),
            TaskPayload::DeleteEntity {
                entity_type: EntityType::Campaign,
                external_id: "x".into(),
            },
        );
        done.status = TaskStatus::Succeeded;
        done.attempt = 2;
        done.result = Some(TaskOutput::Created(campaign.clone()));
        done.started_at = Some(Utc::now());
        done.completed_at = Some(Utc::now());
        done.duration_ms = Some(1250);

        let mut failed = Task::new(
            "ad_set:s",
            TaskKind::CreateEntity,
            BTreeSet::from(["campaign:c".to_string()]),
            TaskPayload::DeleteEntity {
                entity_type: EntityType::AdSet,
                external_id: "y".into(),
            },
        );
        failed.status = TaskStatus::Failed;
        failed.attempt = 1;
        failed.error = Some("validation: bad targeting".into());

        let mut state = WorkflowState::new(request(id), vec![done, failed]);
        state.status = WorkflowStatus::Failed;
        state.error = Some("task 'ad_set:s' failed".into());
        state.created_resources.push(campaign.clone());
        state.rollback = Some(RollbackReport {
            deleted: vec![],
            orphaned: vec![OrphanedResource {
                resource: campaign,
                error: "transient: 503".into(),
            }],
            kept: vec![],
        });
        state
    }

    #[tokio::test]
    async fn full_state_round_trips() {
        let (repo, _dir) = repo().await;
        let state = full_state("r1");

        repo.save(&state).await.unwrap();
        let loaded = repo.load("r1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let (repo, _dir) = repo().await;
        let mut state = WorkflowState::new(request("r1"), vec![]);
        repo.save(&state).await.unwrap();

        state.status = WorkflowStatus::Completed;
        repo.save(&state).await.unwrap();

        let loaded = repo.load("r1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
        assert!(repo.list_by_status(&[WorkflowStatus::Running]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let (repo, _dir) = repo().await;
        assert!(repo.load("nope").await.unwrap().is_none());
        assert!(!repo.delete("nope").await.unwrap());
    }

    #[tokio::test]
    async fn list_by_status_filters_and_orders() {
        let (repo, _dir) = repo().await;
        let mut first = WorkflowState::new(request("a"), vec![]);
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let second = WorkflowState::new(request("b"), vec![]);
        let mut done = WorkflowState::new(request("c"), vec![]);
        done.status = WorkflowStatus::Completed;

        for state in [&second, &first, &done] {
            repo.save(state).await.unwrap();
        }

        let running: Vec<String> = repo
            .list_by_status(&[WorkflowStatus::Running])
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.request_id)
            .collect();
        assert_eq!(running, vec!["a", "b"]);

        let all = repo
            .list_by_status(&[WorkflowStatus::Running, WorkflowStatus::Completed])
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn purge_keeps_running_and_recent() {
        let (repo, _dir) = repo().await;
        let old = Utc::now() - chrono::Duration::hours(48);

        let mut stale_done = WorkflowState::new(request("old-done"), vec![]);
        stale_done.status = WorkflowStatus::RolledBack;
        stale_done.updated_at = old;
        let mut stale_running = WorkflowState::new(request("old-running"), vec![]);
        stale_running.updated_at = old;
        let mut fresh_done = WorkflowState::new(request("fresh"), vec![]);
        fresh_done.status = WorkflowStatus::Completed;

        for state in [&stale_done, &stale_running, &fresh_done] {
            repo.save(state).await.unwrap();
        }

        let purged = repo
            .purge_finished_before(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.load("old-done").await.unwrap().is_none());
        assert!(repo.load("old-running").await.unwrap().is_some());
        assert!(repo.load("fresh").await.unwrap().is_some());
    }
}
