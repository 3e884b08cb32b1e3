//! Single-task execution.
//!
//! [`TaskExecutor`] runs one [`Task`] against the platform through the
//! shared [`Retrier`]. It never touches workflow state; the engine resolves
//! a task's inputs from its dependencies beforehand and applies the outcome
//! afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use adflow_types::error::PlatformError;
use adflow_types::workflow::{CreatedResource, Task, TaskOutput, TaskPayload, TaskStatus};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::retry::{Retrier, RetryOutcome};
use crate::asset_cache::AssetCache;
use crate::platform::{AdPlatform, EntityPayload};

/// Values a task takes from the outputs of its dependencies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    pub parent_id: Option<String>,
    /// Field name -> external id.
    pub references: BTreeMap<String, String>,
}

/// Resolve `task`'s parent and references from the outputs of `tasks`.
///
/// Fails if a referenced task has not succeeded or produced no usable id,
/// which the scheduler never allows to happen.
pub fn resolve_inputs(task: &Task, tasks: &[Task]) -> Result<ResolvedInputs, String> {
    let TaskPayload::CreateEntity {
        parent_task,
        parent_id,
        refs,
        ..
    } = &task.payload
    else {
        return Ok(ResolvedInputs::default());
    };

    let output_of = |task_id: &str| -> Result<String, String> {
        let dep = tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .ok_or_else(|| format!("unknown task '{task_id}'"))?;
        if dep.status != TaskStatus::Succeeded {
            return Err(format!("task '{task_id}' has not succeeded"));
        }
        dep.result
            .as_ref()
            .and_then(|r| r.external_ref())
            .map(str::to_string)
            .ok_or_else(|| format!("task '{task_id}' produced no id"))
    };

    let parent_id = match parent_task {
        Some(parent_task) => Some(output_of(parent_task)?),
        None => parent_id.clone(),
    };

    let mut references = BTreeMap::new();
    for (field, ref_task) in refs {
        references.insert(field.clone(), output_of(ref_task)?);
    }

    Ok(ResolvedInputs {
        parent_id,
        references,
    })
}

/// Outcome of one task execution. `attempts == 0` with an error means the
/// task was halted before its first attempt.
#[derive(Debug)]
pub struct TaskRun {
    pub result: Result<TaskOutput, PlatformError>,
    pub attempts: u32,
}

impl TaskRun {
    pub fn was_halted(&self) -> bool {
        self.attempts == 0 && self.result.is_err()
    }
}

impl From<RetryOutcome<TaskOutput>> for TaskRun {
    fn from(outcome: RetryOutcome<TaskOutput>) -> Self {
        Self {
            result: outcome.result,
            attempts: outcome.attempts,
        }
    }
}

pub struct TaskExecutor<P> {
    platform: Arc<P>,
    retrier: Retrier,
    assets: Arc<AssetCache>,
}

impl<P> Clone for TaskExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            platform: self.platform.clone(),
            retrier: self.retrier.clone(),
            assets: self.assets.clone(),
        }
    }
}

impl<P: AdPlatform> TaskExecutor<P> {
    pub fn new(platform: Arc<P>, retrier: Retrier, assets: Arc<AssetCache>) -> Self {
        Self {
            platform,
            retrier,
            assets,
        }
    }

    pub fn with_retrier(&self, retrier: Retrier) -> Self {
        Self {
            retrier,
            ..self.clone()
        }
    }

    /// Execute `task` with its resolved inputs.
    pub async fn execute(
        &self,
        task: &Task,
        inputs: ResolvedInputs,
        halt: &CancellationToken,
    ) -> TaskRun {
        let platform = self.platform.as_ref();
        let label = task.task_id.as_str();

        match &task.payload {
            TaskPayload::UploadAsset { asset } => {
                if let Some(handle) = self.assets.get(asset) {
                    tracing::debug!(task_id = label, asset_id = %handle.id, "asset cache hit");
                    return TaskRun {
                        result: Ok(TaskOutput::Uploaded(handle)),
                        attempts: 0,
                    };
                }
                let outcome = self
                    .retrier
                    .call(platform, Some(halt), label, |_| async {
                        platform.upload(asset).await.map(TaskOutput::Uploaded)
                    })
                    .await;
                if let Ok(TaskOutput::Uploaded(handle)) = &outcome.result {
                    self.assets.insert(asset, handle.clone());
                }
                outcome.into()
            }

            TaskPayload::CreateEntity {
                entity_type,
                keep,
                fields,
                ..
            } => {
                let payload = EntityPayload {
                    fields: fields.clone(),
                    references: inputs.references,
                };
                let parent_id = inputs.parent_id;
                self.retrier
                    .call(platform, Some(halt), label, |_| async {
                        let external_id = platform
                            .create(*entity_type, &payload, parent_id.as_deref())
                            .await?;
                        Ok(TaskOutput::Created(CreatedResource {
                            resource_type: *entity_type,
                            external_id,
                            parent_id: parent_id.clone(),
                            created_at: Utc::now(),
                            task_id: task.task_id.clone(),
                            keep: *keep,
                        }))
                    })
                    .await
                    .into()
            }

            TaskPayload::UpdateEntity {
                entity_type,
                external_id,
                fields,
            } => self
                .retrier
                .call(platform, Some(halt), label, |_| async {
                    platform.update(*entity_type, external_id, fields).await?;
                    Ok(TaskOutput::Updated {
                        external_id: external_id.clone(),
                    })
                })
                .await
                .into(),

            TaskPayload::DeleteEntity {
                entity_type,
                external_id,
            } => self
                .retrier
                .call(platform, Some(halt), label, |_| async {
                    platform.delete(*entity_type, external_id).await?;
                    Ok(TaskOutput::Deleted {
                        external_id: external_id.clone(),
                    })
                })
                .await
                .into(),

            TaskPayload::Query {
                entity_id,
                date_range,
                metrics,
            } => {
                let mut rows = Vec::new();
                let mut cursor: Option<String> = None;
                let mut attempts = 0u32;
                let mut pages = 0u32;
                loop {
                    // One rate-limited, retried call per page.
                    let outcome = self
                        .retrier
                        .call(platform, Some(halt), label, |_| {
                            platform.fetch(entity_id, date_range, metrics, cursor.as_deref())
                        })
                        .await;
                    let page = match outcome.result {
                        Ok(page) => page,
                        Err(err) => {
                            // Halted between pages reports as halted; earlier
                            // pages are discarded and refetched on resume.
                            let attempts = match outcome.attempts {
                                0 => 0,
                                n => attempts + n,
                            };
                            return TaskRun {
                                result: Err(err),
                                attempts,
                            };
                        }
                    };
                    attempts += outcome.attempts;
                    pages += 1;
                    rows.extend(page.rows);
                    match page.next {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                tracing::debug!(task_id = label, pages, rows = rows.len(), "query complete");
                TaskRun {
                    result: Ok(TaskOutput::Rows { rows }),
                    attempts,
                }
            }
        }
    }
}
