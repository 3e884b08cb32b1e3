//! SQLite idempotency repository.
//!
//! Claims run inside a transaction on the single-connection writer pool, so
//! concurrent claims for one request id are serialized and exactly one wins.

use adflow_core::repository::idempotency::{
    Claim, IdempotencyOutcome, IdempotencyRecord, IdempotencyRepository,
};
use adflow_types::error::RepositoryError;
use adflow_types::workflow::WorkflowResult;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `IdempotencyRepository`.
pub struct SqliteIdempotencyRepository {
    pool: DatabasePool,
}

impl SqliteIdempotencyRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct RecordRow {
    request_id: String,
    outcome: String,
    created_at: String,
    expires_at: String,
}

impl RecordRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            request_id: row.try_get("request_id")?,
            outcome: row.try_get("outcome")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn into_record(self) -> Result<IdempotencyRecord, RepositoryError> {
        let outcome: IdempotencyOutcome = serde_json::from_str(&self.outcome)
            .map_err(|e| RepositoryError::Query(format!("invalid outcome JSON: {e}")))?;
        Ok(IdempotencyRecord {
            request_id: self.request_id,
            outcome,
            created_at: parse_datetime(&self.created_at)?,
            expires_at: parse_datetime(&self.expires_at)?,
        })
    }
}

fn encode_outcome(outcome: &IdempotencyOutcome) -> Result<String, RepositoryError> {
    serde_json::to_string(outcome)
        .map_err(|e| RepositoryError::Query(format!("serialize outcome: {e}")))
}

const SELECT_RECORD: &str =
    "SELECT request_id, outcome, created_at, expires_at FROM idempotency_records WHERE request_id = ?";

// ---------------------------------------------------------------------------
// IdempotencyRepository impl
// ---------------------------------------------------------------------------

impl IdempotencyRepository for SqliteIdempotencyRepository {
    async fn claim(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Claim, RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let existing = sqlx::query(SELECT_RECORD)
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if let Some(row) = existing {
            let record = RecordRow::from_row(&row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_record()?;
            if !record.is_expired(now) {
                return Ok(match record.outcome {
                    IdempotencyOutcome::InFlight => Claim::InFlight,
                    IdempotencyOutcome::Completed { result } => Claim::Completed(result),
                });
            }
        }

        sqlx::query(
            r#"INSERT INTO idempotency_records (request_id, outcome, created_at, expires_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(request_id) DO UPDATE SET
                 outcome = excluded.outcome,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at"#,
        )
        .bind(request_id)
        .bind(encode_outcome(&IdempotencyOutcome::InFlight)?)
        .bind(format_datetime(&now))
        .bind(format_datetime(&expires_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(Claim::Claimed)
    }

    async fn complete(
        &self,
        request_id: &str,
        result: &WorkflowResult,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let outcome = encode_outcome(&IdempotencyOutcome::Completed {
            result: result.clone(),
        })?;

        sqlx::query(
            r#"INSERT INTO idempotency_records (request_id, outcome, created_at, expires_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(request_id) DO UPDATE SET
                 outcome = excluded.outcome,
                 expires_at = excluded.expires_at"#,
        )
        .bind(request_id)
        .bind(&outcome)
        .bind(format_datetime(&Utc::now()))
        .bind(format_datetime(&expires_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn release(&self, request_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE request_id = ?")
            .bind(request_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, request_id: &str) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let row = sqlx::query(SELECT_RECORD)
            .bind(request_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RecordRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= ?")
            .bind(format_datetime(&now))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
