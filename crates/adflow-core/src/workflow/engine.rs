//! Workflow engine: plans a request, runs its tasks on a bounded worker pool,
//! checkpoints every transition and rolls back on failure.
//!
//! # Execution flow
//!
//! 1. Validate and plan the request (no side effects on failure).
//! 2. Dry runs return the planned tasks; nothing is stored or called.
//! 3. Claim the request id. Cached results are returned unchanged; a
//!    concurrent identical submit in this process waits for the first run.
//! 4. Checkpoint the initial state, then schedule ready tasks onto a
//!    `JoinSet` bounded by `max_concurrency`. Scheduling decisions and state
//!    transitions happen only on this loop.
//! 5. On the first terminal task failure, cancellation or deadline: mark the
//!    workflow failed, stop scheduling, halt retries of in-flight tasks and
//!    wait for them, then roll back every recorded resource.
//! 6. Store the result under the request id and return it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use adflow_types::config::{EngineConfig, ExecutionConfig};
use adflow_types::workflow::{
    CreatedResource, Task, TaskKind, TaskOutput, TaskStatus, TaskTiming, WorkflowRequest,
    WorkflowResult, WorkflowState, WorkflowStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::dag::{ReadinessGate, get_dependents, unreachable};
use super::idempotency::{Admission, IdempotencyError, IdempotencyStore, wait_for_result};
use super::plan::{self, WorkflowError};
use super::rate_limit::RateLimiter;
use super::retry::{Retrier, RetryPolicy};
use super::rollback::RollbackManager;
use super::task_executor::{TaskExecutor, TaskRun, resolve_inputs};
use crate::asset_cache::AssetCache;
use crate::platform::AdPlatform;
use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::idempotency::IdempotencyRepository;

/// Failure cause recorded when a caller cancels a workflow.
const CANCELLED_CAUSE: &str = "cancelled by caller";

// ---------------------------------------------------------------------------
// WorkflowOrchestrator trait
// ---------------------------------------------------------------------------

/// Boundary surface of the workflow engine.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods.
pub trait WorkflowOrchestrator: Send + Sync {
    /// Run a request to completion (or return its cached result).
    fn submit(
        &self,
        request: WorkflowRequest,
    ) -> impl std::future::Future<Output = Result<WorkflowResult, EngineError>> + Send;

    /// Continue an interrupted workflow from its last checkpoint.
    fn resume(
        &self,
        request_id: &str,
    ) -> impl std::future::Future<Output = Result<WorkflowResult, EngineError>> + Send;

    /// Current checkpointed state of a workflow.
    fn status(
        &self,
        request_id: &str,
    ) -> impl std::future::Future<Output = Result<WorkflowState, EngineError>> + Send;

    /// Ask a running workflow to stop and roll back.
    fn cancel(
        &self,
        request_id: &str,
    ) -> impl std::future::Future<Output = Result<CancelAck, EngineError>> + Send;
}

/// Answer to a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAck {
    pub request_id: String,
    /// `false` when the workflow already finished or is not running in this
    /// process.
    pub accepted: bool,
    pub status: WorkflowStatus,
}

/// Counts removed by [`WorkflowEngine::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub checkpoints: u64,
    pub idempotency_records: u64,
    pub asset_handles: usize,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Generic over the ad platform and both storage backends.
pub struct WorkflowEngine<P, C, I>
where
    P: AdPlatform,
    C: CheckpointRepository,
    I: IdempotencyRepository,
{
    platform: Arc<P>,
    retrier: Retrier,
    executor: TaskExecutor<P>,
    rollback: RollbackManager<P>,
    checkpoint: CheckpointManager<C>,
    idempotency: IdempotencyStore<I>,
    assets: Arc<AssetCache>,
    config: ExecutionConfig,
    /// Cancellation tokens of workflows running in this process.
    cancellation_tokens: DashMap<String, CancellationToken>,
}

impl<P, C, I> WorkflowEngine<P, C, I>
where
    P: AdPlatform + 'static,
    C: CheckpointRepository,
    I: IdempotencyRepository,
{
    pub fn new(platform: Arc<P>, checkpoints: C, idempotency: I, config: &EngineConfig) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let retrier = Retrier::new(
            limiter,
            RetryPolicy::from_config(&config.retry),
            Duration::from_secs(config.engine.task_timeout_secs),
        );
        let assets = Arc::new(AssetCache::new(Duration::from_secs(
            config.engine.asset_cache_ttl_hours * 3600,
        )));

        Self {
            executor: TaskExecutor::new(platform.clone(), retrier.clone(), assets.clone()),
            assets,
            rollback: RollbackManager::new(platform.clone(), retrier.clone()),
            platform,
            retrier,
            checkpoint: CheckpointManager::new(checkpoints),
            idempotency: IdempotencyStore::new(
                idempotency,
                Duration::from_secs(config.engine.idempotency_ttl_hours * 3600),
            ),
            config: config.engine.clone(),
            cancellation_tokens: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Delete the checkpoint and idempotency record of a finished workflow.
    /// Returns `false` if neither existed.
    pub async fn purge(&self, request_id: &str) -> Result<bool, EngineError> {
        if self.idempotency.is_running_here(request_id) {
            return Err(EngineError::AlreadyRunning(request_id.to_string()));
        }
        if let Some(state) = self.checkpoint.find(request_id).await? {
            if state.status == WorkflowStatus::Running {
                return Err(EngineError::AlreadyRunning(request_id.to_string()));
            }
        }
        let checkpoint = self.checkpoint.purge(request_id).await?;
        let record = self.idempotency.purge(request_id).await?;
        tracing::info!(request_id, "purged workflow");
        Ok(checkpoint || record)
    }

    /// Delete finished checkpoints past the retention window and expired
    /// idempotency records, and evict stale asset handles.
    pub async fn purge_expired(&self) -> Result<PurgeReport, EngineError> {
        let asset_handles = self.assets.evict_expired();
        if asset_handles > 0 {
            tracing::debug!(evicted = asset_handles, "evicted expired asset handles");
        }
        let retention = chrono::Duration::hours(self.config.retention_hours as i64);
        let checkpoints = self
            .checkpoint
            .purge_finished_before(Utc::now() - retention)
            .await?;
        let idempotency_records = self.idempotency.purge_expired().await?;
        Ok(PurgeReport {
            checkpoints,
            idempotency_records,
            asset_handles,
        })
    }

    /// Forget every cached asset handle, so the next upload of each asset
    /// reaches the platform again.
    pub fn clear_asset_cache(&self) -> usize {
        let cleared = self.assets.clear();
        tracing::info!(cleared, "cleared asset cache");
        cleared
    }

    /// Resume every workflow interrupted by a crash. Failures are logged and
    /// skipped; the results of the resumed workflows are returned.
    pub async fn recover(&self) -> Result<Vec<WorkflowResult>, EngineError> {
        let interrupted = self.checkpoint.interrupted().await?;
        tracing::info!(count = interrupted.len(), "recovering interrupted workflows");

        let mut results = Vec::new();
        for state in interrupted {
            match self.resume(&state.request_id).await {
                Ok(result) => results.push(result),
                Err(err) => tracing::warn!(
                    request_id = %state.request_id,
                    error = %err,
                    "failed to recover workflow"
                ),
            }
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Driving a workflow
    // -----------------------------------------------------------------------

    /// Run (or continue) `state` to a terminal status.
    async fn drive(
        &self,
        mut state: WorkflowState,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult, EngineError> {
        if state.status == WorkflowStatus::Running {
            self.execute_tasks(&mut state, cancel).await?;
        }

        if state.status == WorkflowStatus::Failed && state.rollback.is_none() {
            let report = self
                .rollback
                .rollback(&state.request_id, &state.created_resources)
                .await;
            state.status = if report.is_complete() {
                WorkflowStatus::RolledBack
            } else {
                WorkflowStatus::Failed
            };
            state.rollback = Some(report);

            let applied = irreversible_tasks(&state.tasks);
            if !applied.is_empty() {
                tracing::warn!(
                    request_id = %state.request_id,
                    tasks = ?applied,
                    "applied updates and deletions are not undone by rollback"
                );
                let note = format!("not undone by rollback: {}", applied.join(", "));
                state.error = Some(match state.error.take() {
                    Some(cause) => format!("{cause}; {note}"),
                    None => note,
                });
            }

            if let Err(err) = self.checkpoint.checkpoint(&mut state).await {
                tracing::warn!(
                    request_id = %state.request_id,
                    error = %err,
                    "could not checkpoint rollback outcome"
                );
            }
        }

        tracing::info!(
            request_id = %state.request_id,
            status = state.status.as_str(),
            resources = state.created_resources.len(),
            "workflow finished"
        );
        Ok(state.to_result())
    }

    /// Schedule tasks until every task succeeded or the workflow failed.
    /// Leaves `state.status` as `Completed` or `Failed`.
    async fn execute_tasks(
        &self,
        state: &mut WorkflowState,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let gate = ReadinessGate::new(&state.tasks)?;
        let halt = cancel.child_token();

        let options = &state.request.options;
        let workflow_timeout = Duration::from_secs(
            options
                .timeout_secs
                .unwrap_or(self.config.workflow_timeout_secs),
        );
        let task_timeout = Duration::from_secs(
            options
                .task_timeout_secs
                .unwrap_or(self.config.task_timeout_secs),
        );
        let executor = self
            .executor
            .with_retrier(self.retrier.with_attempt_timeout(task_timeout));
        let deadline = Instant::now() + workflow_timeout;
        let max_concurrency = self.config.max_concurrency.max(1);
        let request_id = state.request_id.clone();

        let mut join_set: JoinSet<TaskRun> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut failure: Option<String> = None;

        loop {
            if failure.is_none() {
                if cancel.is_cancelled() {
                    failure = Some(CANCELLED_CAUSE.to_string());
                } else if Instant::now() >= deadline {
                    failure = Some(timeout_cause(workflow_timeout));
                }
                if failure.is_some() {
                    halt.cancel();
                }
            }

            if failure.is_none() {
                let ready: Vec<String> = gate
                    .ready(&state.tasks)
                    .into_iter()
                    .map(str::to_string)
                    .collect();

                for task_id in ready {
                    if join_set.len() >= max_concurrency {
                        break;
                    }

                    let inputs = match state.task(&task_id).map(|t| resolve_inputs(t, &state.tasks)) {
                        Some(Ok(inputs)) => inputs,
                        Some(Err(err)) => {
                            let cause = format!("task '{task_id}' failed: {err}");
                            if let Some(task) = state.task_mut(&task_id) {
                                task.status = TaskStatus::Failed;
                                task.error = Some(err);
                            }
                            failure = Some(cause);
                            halt.cancel();
                            break;
                        }
                        None => continue,
                    };

                    let Some(task) = state.task_mut(&task_id) else {
                        continue;
                    };
                    task.status = TaskStatus::Running;
                    task.started_at = Some(Utc::now());
                    let task = task.clone();

                    if let Err(err) = self.checkpoint.checkpoint(state).await {
                        if let Some(task) = state.task_mut(&task_id) {
                            task.reset();
                        }
                        failure = Some(format!("checkpoint failed: {err}"));
                        halt.cancel();
                        break;
                    }

                    tracing::debug!(request_id = %request_id, task_id = %task_id, "task started");
                    let executor = executor.clone();
                    let halt = halt.clone();
                    let handle = join_set
                        .spawn(async move { executor.execute(&task, inputs, &halt).await });
                    in_flight.insert(handle.id(), task_id);
                }
            }

            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if failure.is_none() => {
                    tracing::info!(request_id = %request_id, "workflow cancelled");
                    failure = Some(CANCELLED_CAUSE.to_string());
                    halt.cancel();
                }

                _ = tokio::time::sleep_until(deadline), if failure.is_none() => {
                    tracing::warn!(request_id = %request_id, "workflow deadline exceeded");
                    failure = Some(timeout_cause(workflow_timeout));
                    halt.cancel();
                }

                joined = join_set.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let (task_id, run) = match joined {
                        Ok((id, run)) => (in_flight.remove(&id), Ok(run)),
                        Err(err) => (in_flight.remove(&err.id()), Err(err.to_string())),
                    };
                    let Some(task_id) = task_id else { continue };

                    if let Some(cause) = apply_outcome(state, &task_id, run) {
                        if failure.is_none() {
                            failure = Some(cause);
                            halt.cancel();
                        }
                    }
                    if let Err(err) = self.checkpoint.checkpoint(state).await {
                        if failure.is_none() {
                            failure = Some(format!("checkpoint failed: {err}"));
                            halt.cancel();
                        }
                    }
                }
            }
        }

        match failure {
            Some(cause) => {
                state.status = WorkflowStatus::Failed;
                state.error = Some(cause);
            }
            None if state.tasks.iter().all(|t| t.status == TaskStatus::Succeeded) => {
                state.status = WorkflowStatus::Completed;
            }
            None => {
                let blocked = unreachable(&state.tasks);
                let mut stuck: Vec<&str> = state
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .map(|t| t.task_id.as_str())
                    .collect();
                stuck.sort_by_key(|id| !blocked.contains(id));
                state.error = Some(format!("tasks could not be scheduled: {}", stuck.join(", ")));
                state.status = WorkflowStatus::Failed;
            }
        }

        if let Err(err) = self.checkpoint.checkpoint(state).await {
            if state.status == WorkflowStatus::Completed {
                state.status = WorkflowStatus::Failed;
                state.error = Some(format!("checkpoint failed: {err}"));
            } else {
                tracing::warn!(request_id = %request_id, error = %err, "could not checkpoint failure");
            }
        }

        if let Some(error) = &state.error {
            tracing::warn!(request_id = %request_id, error = error.as_str(), "workflow failed");
        }
        Ok(())
    }

    /// Confirm every recorded resource still exists. Missing ones are
    /// dropped and their tasks reset so they run again.
    ///
    /// Tasks downstream of a missing resource point at an entity that is
    /// gone, so they are reset too. Resources they created are deleted
    /// first; any that cannot be deleted (or are flagged `keep`) stay
    /// recorded, since they still exist remotely.
    async fn verify_resources(&self, state: &mut WorkflowState) -> Result<(), EngineError> {
        let platform = self.platform.as_ref();
        let mut missing = Vec::new();

        for resource in &state.created_resources {
            let label = format!("verify:{}", resource.external_id);
            let outcome = self
                .retrier
                .call(platform, None, &label, |_| async {
                    platform
                        .exists(resource.resource_type, &resource.external_id)
                        .await
                })
                .await;
            match outcome.result {
                Ok(true) => {}
                Ok(false) => missing.push(resource.task_id.clone()),
                Err(err) => {
                    return Err(EngineError::Verification(format!(
                        "could not verify {} '{}': {err}",
                        resource.resource_type.as_str(),
                        resource.external_id
                    )));
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        let mut stale: BTreeSet<String> = BTreeSet::new();
        for task_id in &missing {
            stale.extend(
                get_dependents(task_id, &state.tasks)
                    .into_iter()
                    .filter(|id| !missing.iter().any(|m| m == id))
                    .map(str::to_string),
            );
        }
        stale.retain(|id| {
            state
                .task(id)
                .is_some_and(|t| matches!(t.status, TaskStatus::Succeeded | TaskStatus::Running))
        });

        tracing::warn!(
            request_id = %state.request_id,
            missing = ?missing,
            dependents = ?stale,
            "recorded resources no longer exist"
        );

        state.created_resources.retain(|r| !missing.contains(&r.task_id));

        let detached: Vec<CreatedResource> = state
            .created_resources
            .iter()
            .filter(|r| stale.contains(&r.task_id))
            .cloned()
            .collect();
        if !detached.is_empty() {
            let report = self.rollback.rollback(&state.request_id, &detached).await;
            for orphan in &report.orphaned {
                tracing::warn!(
                    request_id = %state.request_id,
                    external_id = %orphan.resource.external_id,
                    error = %orphan.error,
                    "could not delete resource under a missing parent"
                );
            }
            state
                .created_resources
                .retain(|r| !report.deleted.contains(r));
        }

        for task_id in missing.iter().chain(stale.iter()) {
            if let Some(task) = state.task_mut(task_id) {
                task.reset();
            }
        }
        Ok(())
    }

    /// Register a cancellation token for a workflow about to run here.
    fn register(&self, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellation_tokens
            .insert(request_id.to_string(), token.clone());
        token
    }

    async fn load_state(&self, request_id: &str) -> Result<WorkflowState, EngineError> {
        self.checkpoint
            .restore(request_id)
            .await
            .map_err(|err| match err {
                CheckpointError::NotFound(id) => EngineError::NotFound(id),
                other => EngineError::Checkpoint(other),
            })
    }
}

impl<P, C, I> WorkflowOrchestrator for WorkflowEngine<P, C, I>
where
    P: AdPlatform + 'static,
    C: CheckpointRepository,
    I: IdempotencyRepository,
{
    async fn submit(&self, request: WorkflowRequest) -> Result<WorkflowResult, EngineError> {
        let tasks = plan::plan(&request)?;

        if request.options.dry_run {
            tracing::info!(request_id = %request.request_id, tasks = tasks.len(), "dry run");
            return Ok(dry_run_result(&request, &tasks));
        }

        let guard = match self.idempotency.admit(&request.request_id).await? {
            Admission::Owner(guard) => guard,
            Admission::Completed(result) => return Ok(result),
            Admission::Joined(receiver) => return Ok(wait_for_result(receiver).await?),
            Admission::InFlightElsewhere => {
                let snapshot = self.checkpoint.find(&request.request_id).await?;
                return Ok(in_flight_result(&request, snapshot));
            }
        };

        let cancel = self.register(&request.request_id);
        tracing::info!(
            request_id = %request.request_id,
            workflow_type = request.workflow_type.as_str(),
            priority = ?request.options.priority,
            tasks = tasks.len(),
            "starting workflow"
        );

        let mut state = WorkflowState::new(request, tasks);
        let outcome = match self.checkpoint.checkpoint(&mut state).await {
            Ok(()) => self.drive(state, &cancel).await,
            Err(err) => Err(err.into()),
        };
        self.cancellation_tokens.remove(guard.request_id());

        match outcome {
            Ok(result) => {
                self.idempotency.finish(guard, &result).await?;
                Ok(result)
            }
            Err(err) => {
                self.idempotency.abandon(guard).await?;
                Err(err)
            }
        }
    }

    async fn resume(&self, request_id: &str) -> Result<WorkflowResult, EngineError> {
        let mut state = self.load_state(request_id).await?;

        let finished = match state.status {
            WorkflowStatus::Completed | WorkflowStatus::RolledBack => true,
            WorkflowStatus::Failed => state.rollback.is_some(),
            WorkflowStatus::Running => false,
        };
        if finished {
            return Ok(state.to_result());
        }

        let Some(guard) = self.idempotency.adopt(request_id) else {
            return Err(EngineError::AlreadyRunning(request_id.to_string()));
        };
        let cancel = self.register(request_id);
        tracing::info!(request_id, status = state.status.as_str(), "resuming workflow");

        let outcome = async {
            self.verify_resources(&mut state).await?;

            if state.status == WorkflowStatus::Running {
                for task in &mut state.tasks {
                    if task.status == TaskStatus::Running {
                        task.reset();
                    }
                }
                if let Some(failed) = state.tasks.iter().find(|t| t.status == TaskStatus::Failed) {
                    let cause = format!(
                        "task '{}' failed: {}",
                        failed.task_id,
                        failed.error.as_deref().unwrap_or("unknown error")
                    );
                    state.status = WorkflowStatus::Failed;
                    state.error = Some(cause);
                }
            }

            self.checkpoint.checkpoint(&mut state).await?;
            self.drive(state, &cancel).await
        }
        .await;
        self.cancellation_tokens.remove(request_id);

        match outcome {
            Ok(result) => {
                self.idempotency.finish(guard, &result).await?;
                Ok(result)
            }
            Err(err) => {
                drop(guard);
                Err(err)
            }
        }
    }

    async fn status(&self, request_id: &str) -> Result<WorkflowState, EngineError> {
        self.load_state(request_id).await
    }

    async fn cancel(&self, request_id: &str) -> Result<CancelAck, EngineError> {
        let token = self
            .cancellation_tokens
            .get(request_id)
            .map(|t| t.value().clone());
        if let Some(token) = token {
            token.cancel();
            tracing::info!(request_id, "cancellation requested");
            return Ok(CancelAck {
                request_id: request_id.to_string(),
                accepted: true,
                status: WorkflowStatus::Running,
            });
        }

        let state = self.load_state(request_id).await?;
        Ok(CancelAck {
            request_id: request_id.to_string(),
            accepted: false,
            status: state.status,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Record a finished task run on `state`. Returns the failure cause if the
/// task failed terminally.
fn apply_outcome(
    state: &mut WorkflowState,
    task_id: &str,
    run: Result<TaskRun, String>,
) -> Option<String> {
    let now = Utc::now();
    let request_id = state.request_id.clone();
    let task = state.task_mut(task_id)?;

    let run = match run {
        Ok(run) if run.was_halted() => {
            tracing::debug!(request_id = %request_id, task_id, "task halted before starting");
            task.reset();
            return None;
        }
        Ok(run) => run,
        Err(join_error) => {
            task.status = TaskStatus::Failed;
            task.error = Some(join_error.clone());
            task.completed_at = Some(now);
            return Some(format!("task '{task_id}' aborted: {join_error}"));
        }
    };

    task.attempt += run.attempts;
    task.completed_at = Some(now);
    task.duration_ms = task
        .started_at
        .map(|started| (now - started).num_milliseconds().max(0) as u64);

    match run.result {
        Ok(output) => {
            tracing::debug!(
                request_id = %request_id,
                task_id,
                attempts = run.attempts,
                "task succeeded"
            );
            let created = match &output {
                TaskOutput::Created(resource) => Some(resource.clone()),
                _ => None,
            };
            task.status = TaskStatus::Succeeded;
            task.result = Some(output);
            if let Some(resource) = created {
                state.created_resources.push(resource);
            }
            None
        }
        Err(err) => {
            tracing::warn!(
                request_id = %request_id,
                task_id,
                attempts = run.attempts,
                error = %err,
                "task failed"
            );
            task.status = TaskStatus::Failed;
            task.error = Some(err.to_string());
            Some(format!("task '{task_id}' failed: {err}"))
        }
    }
}

/// Succeeded tasks whose effect rollback cannot reverse: updates and
/// deletions of pre-existing entities.
fn irreversible_tasks(tasks: &[Task]) -> Vec<&str> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Succeeded)
        .filter(|t| matches!(t.kind, TaskKind::UpdateEntity | TaskKind::DeleteEntity))
        .map(|t| t.task_id.as_str())
        .collect()
}

fn timeout_cause(timeout: Duration) -> String {
    format!("workflow timed out after {}s", timeout.as_secs())
}

fn dry_run_result(request: &WorkflowRequest, tasks: &[Task]) -> WorkflowResult {
    WorkflowResult {
        request_id: request.request_id.clone(),
        status: WorkflowStatus::Completed,
        dry_run: true,
        resources: vec![],
        rolled_back: vec![],
        orphaned: vec![],
        kept: vec![],
        failed_tasks: vec![],
        queries: Default::default(),
        tasks: tasks.iter().map(TaskTiming::from).collect(),
        cause: None,
    }
}

/// Result for a request another process is running: its latest snapshot,
/// reported as running.
fn in_flight_result(request: &WorkflowRequest, snapshot: Option<WorkflowState>) -> WorkflowResult {
    let mut result = match snapshot {
        Some(state) => state.to_result(),
        None => WorkflowState::new(request.clone(), vec![]).to_result(),
    };
    result.status = WorkflowStatus::Running;
    result.cause = Some("request is in flight in another process".to_string());
    result
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced by the engine's boundary operations. Task failures are
/// not errors: they end up in the returned [`WorkflowResult`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request is invalid; nothing was stored or called.
    #[error(transparent)]
    Validation(#[from] WorkflowError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow is already running: {0}")]
    AlreadyRunning(String),

    /// Recorded resources could not be checked on resume.
    #[error("resource verification failed: {0}")]
    Verification(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
