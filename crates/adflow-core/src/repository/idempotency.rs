//! Idempotency repository trait definition.
//!
//! Records, per caller-supplied request id, whether a workflow is in flight
//! or has completed with a cached result. `claim` must be atomic: of any
//! number of concurrent claims for the same id, exactly one gets
//! [`Claim::Claimed`].

use adflow_types::error::RepositoryError;
use adflow_types::workflow::WorkflowResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored outcome for a request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IdempotencyOutcome {
    InFlight,
    Completed { result: WorkflowResult },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub request_id: String,
    pub outcome: IdempotencyOutcome,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller now owns the request and must run it.
    Claimed,
    /// Another owner is running the request.
    InFlight,
    /// The request already finished; the cached result is returned unchanged.
    Completed(WorkflowResult),
}

pub trait IdempotencyRepository: Send + Sync {
    /// Claim `request_id` as in flight until `expires_at`. An expired record
    /// is treated as absent and replaced.
    fn claim(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Claim, RepositoryError>> + Send;

    /// Store the final result for `request_id`.
    fn complete(
        &self,
        request_id: &str,
        result: &WorkflowResult,
        expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Drop any record for `request_id`. Returns `true` if one existed.
    fn release(
        &self,
        request_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn get(
        &self,
        request_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<IdempotencyRecord>, RepositoryError>> + Send;

    /// Delete records that expired at or before `now`.
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
