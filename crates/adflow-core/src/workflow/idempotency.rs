//! Request deduplication by caller-supplied request id.
//!
//! Two layers:
//! - an in-process registry of running requests, so concurrent identical
//!   submits in one process wait on a single run through a `watch` channel;
//! - the durable [`IdempotencyRepository`], which caches completed results
//!   for the TTL and marks requests owned by another process as in flight.

use std::sync::Arc;

use adflow_types::workflow::WorkflowResult;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::repository::idempotency::{Claim, IdempotencyRepository};

type Registry = DashMap<String, watch::Receiver<Option<WorkflowResult>>>;

/// How a submit for a given request id should proceed.
pub enum Admission {
    /// The caller owns the run and must hand the guard back to
    /// [`IdempotencyStore::finish`] or [`IdempotencyStore::abandon`].
    Owner(RunGuard),
    /// Another caller in this process is running the request.
    Joined(watch::Receiver<Option<WorkflowResult>>),
    /// The request already completed; the cached result is returned unchanged.
    Completed(WorkflowResult),
    /// Another process holds the request.
    InFlightElsewhere,
}

/// Ownership of one in-process run. Dropping it unregisters the run, which
/// wakes any joined callers.
pub struct RunGuard {
    request_id: String,
    sender: watch::Sender<Option<WorkflowResult>>,
    registry: Arc<Registry>,
}

impl RunGuard {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.request_id);
    }
}

pub struct IdempotencyStore<R: IdempotencyRepository> {
    repo: R,
    running: Arc<Registry>,
    ttl: chrono::Duration,
}

impl<R: IdempotencyRepository> IdempotencyStore<R> {
    pub fn new(repo: R, ttl: std::time::Duration) -> Self {
        Self {
            repo,
            running: Arc::new(DashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Whether this process is currently running `request_id`.
    pub fn is_running_here(&self, request_id: &str) -> bool {
        self.running.contains_key(request_id)
    }

    /// Decide how a submit for `request_id` proceeds.
    pub async fn admit(&self, request_id: &str) -> Result<Admission, IdempotencyError> {
        let guard = match self.running.entry(request_id.to_string()) {
            Entry::Occupied(entry) => {
                tracing::debug!(request_id, "joining in-process run");
                return Ok(Admission::Joined(entry.get().clone()));
            }
            Entry::Vacant(slot) => {
                let (sender, receiver) = watch::channel(None);
                slot.insert(receiver);
                RunGuard {
                    request_id: request_id.to_string(),
                    sender,
                    registry: self.running.clone(),
                }
            }
        };

        let now = Utc::now();
        let claim = self
            .repo
            .claim(request_id, now, now + self.ttl)
            .await
            .map_err(|e| IdempotencyError::Repository(e.to_string()))?;

        match claim {
            Claim::Claimed => Ok(Admission::Owner(guard)),
            Claim::Completed(result) => {
                tracing::debug!(request_id, "returning cached result");
                // Wake anyone who joined while the durable store was consulted.
                guard.sender.send_replace(Some(result.clone()));
                Ok(Admission::Completed(result))
            }
            Claim::InFlight => Ok(Admission::InFlightElsewhere),
        }
    }

    /// Record the final result and release joined callers.
    pub async fn finish(
        &self,
        guard: RunGuard,
        result: &WorkflowResult,
    ) -> Result<(), IdempotencyError> {
        let stored = self
            .repo
            .complete(&guard.request_id, result, Utc::now() + self.ttl)
            .await
            .map_err(|e| IdempotencyError::Repository(e.to_string()));
        guard.sender.send_replace(Some(result.clone()));
        stored
    }

    /// Give up ownership without a result; the request id becomes free.
    pub async fn abandon(&self, guard: RunGuard) -> Result<(), IdempotencyError> {
        self.repo
            .release(&guard.request_id)
            .await
            .map_err(|e| IdempotencyError::Repository(e.to_string()))?;
        Ok(())
    }

    /// Take in-process ownership of a request being resumed from a
    /// checkpoint. The durable record is left as is; [`Self::finish`]
    /// overwrites it. Returns `None` if the request already runs here.
    pub fn adopt(&self, request_id: &str) -> Option<RunGuard> {
        match self.running.entry(request_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (sender, receiver) = watch::channel(None);
                slot.insert(receiver);
                Some(RunGuard {
                    request_id: request_id.to_string(),
                    sender,
                    registry: self.running.clone(),
                })
            }
        }
    }

    pub async fn purge(&self, request_id: &str) -> Result<bool, IdempotencyError> {
        self.repo
            .release(request_id)
            .await
            .map_err(|e| IdempotencyError::Repository(e.to_string()))
    }

    pub async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        self.repo
            .purge_expired(Utc::now())
            .await
            .map_err(|e| IdempotencyError::Repository(e.to_string()))
    }
}

/// Wait for the run a joined caller attached to.
pub async fn wait_for_result(
    mut receiver: watch::Receiver<Option<WorkflowResult>>,
) -> Result<WorkflowResult, IdempotencyError> {
    let value = receiver
        .wait_for(Option::is_some)
        .await
        .map_err(|_| IdempotencyError::Abandoned)?;
    value.clone().ok_or(IdempotencyError::Abandoned)
}

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("idempotency repository error: {0}")]
    Repository(String),

    /// The run this caller joined ended without a result.
    #[error("the in-process run for this request ended without a result")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryIdempotencyRepository;
    use adflow_types::workflow::WorkflowStatus;
    use std::time::Duration;

    fn result(id: &str) -> WorkflowResult {
        WorkflowResult {
            request_id: id.into(),
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

    fn store() -> IdempotencyStore<MemoryIdempotencyRepository> {
        IdempotencyStore::new(MemoryIdempotencyRepository::new(), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn second_admit_joins_and_receives_result() {
        let store = store();
        let Admission::Owner(guard) = store.admit("r1").await.unwrap() else {
            panic!("first admit should own the run");
        };
        let Admission::Joined(receiver) = store.admit("r1").await.unwrap() else {
            panic!("second admit should join");
        };

        let waiter = tokio::spawn(wait_for_result(receiver));
        store.finish(guard, &result("r1")).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), result("r1"));
        assert!(!store.is_running_here("r1"));

        // After the run, the durable record answers.
        assert!(matches!(
            store.admit("r1").await.unwrap(),
            Admission::Completed(r) if r == result("r1")
        ));
    }

    #[tokio::test]
    async fn abandoned_run_frees_the_key() {
        let store = store();
        let Admission::Owner(guard) = store.admit("r1").await.unwrap() else {
            panic!("expected ownership");
        };
        let Admission::Joined(receiver) = store.admit("r1").await.unwrap() else {
            panic!("expected join");
        };
        store.abandon(guard).await.unwrap();

        assert!(matches!(
            wait_for_result(receiver).await,
            Err(IdempotencyError::Abandoned)
        ));
        assert!(matches!(
            store.admit("r1").await.unwrap(),
            Admission::Owner(_)
        ));
    }

    #[tokio::test]
    async fn adopted_run_blocks_second_owner_and_stores_result() {
        let store = store();
        let guard = store.adopt("r1").unwrap();
        assert!(store.adopt("r1").is_none());
        assert!(matches!(
            store.admit("r1").await.unwrap(),
            Admission::Joined(_)
        ));

        store.finish(guard, &result("r1")).await.unwrap();
        let record = store.repo().get("r1").await.unwrap().unwrap();
        assert!(matches!(
            record.outcome,
            crate::repository::idempotency::IdempotencyOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn durable_in_flight_is_reported() {
        let repo = MemoryIdempotencyRepository::new();
        let now = Utc::now();
        repo.claim("r1", now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let store = IdempotencyStore::new(repo, Duration::from_secs(3600));
        assert!(matches!(
            store.admit("r1").await.unwrap(),
            Admission::InFlightElsewhere
        ));
        assert!(!store.is_running_here("r1"));
    }
}
