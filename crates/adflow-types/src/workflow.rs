//! Workflow domain types for adflow.
//!
//! A `WorkflowRequest` describes a hierarchy of ad platform entities to
//! create (or update, delete, query). The engine plans it into `Task`s, tracks
//! progress in a checkpointed `WorkflowState`, and reports a `WorkflowResult`.
//!
//! Every collection that reaches serialized output is ordered so that two
//! serializations of the same value are byte-identical.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One top-level request submitted by a caller. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// Caller-supplied idempotency key.
    pub request_id: String,
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub payload: WorkflowPayload,
    #[serde(default)]
    pub options: WorkflowOptions,
}

impl WorkflowRequest {
    /// Parse a request from JSON. Any parse failure, including an unknown
    /// `workflow_type`, is reported as an [`InvalidRequest`].
    pub fn from_json(json: &str) -> Result<Self, InvalidRequest> {
        serde_json::from_str(json).map_err(|e| InvalidRequest(e.to_string()))
    }
}

/// A request that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid workflow request: {0}")]
pub struct InvalidRequest(pub String);

/// Kind of workflow requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Create assets, a campaign, its ad sets, creatives and ads.
    FullHierarchy,
    /// Update fields on existing entities.
    Update,
    /// Delete existing entities, children first.
    DeleteCascade,
    /// Read-only insights queries.
    InsightsFetch,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::FullHierarchy => "full_hierarchy",
            WorkflowType::Update => "update",
            WorkflowType::DeleteCascade => "delete_cascade",
            WorkflowType::InsightsFetch => "insights_fetch",
        }
    }
}

/// Execution options attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Plan and validate only; no collaborator calls, nothing persisted.
    #[serde(default)]
    pub dry_run: bool,
    /// Overall workflow deadline in seconds (overrides the configured default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Per-attempt task timeout in seconds (overrides the configured default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Nested entity specifications. Which sections are used depends on the
/// request's [`WorkflowType`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<AssetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<EntitySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ad_sets: Vec<EntitySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creatives: Vec<EntitySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ads: Vec<EntitySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<EntityUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletions: Vec<EntityRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<InsightsQuerySpec>,
}

impl WorkflowPayload {
    /// Whether the sections relevant to `workflow_type` are all empty.
    pub fn is_empty_for(&self, workflow_type: WorkflowType) -> bool {
        match workflow_type {
            WorkflowType::FullHierarchy => {
                self.assets.is_empty()
                    && self.campaign.is_none()
                    && self.ad_sets.is_empty()
                    && self.creatives.is_empty()
                    && self.ads.is_empty()
            }
            WorkflowType::Update => self.updates.is_empty(),
            WorkflowType::DeleteCascade => self.deletions.is_empty(),
            WorkflowType::InsightsFetch => self.queries.is_empty(),
        }
    }
}

/// Specification of one entity to create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Local identifier, unique within the request.
    pub key: String,
    /// Key of a parent created by the same request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// External ID of an already existing parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Field name -> key of the task whose output fills that field
    /// (e.g. `creative_id -> "summer-creative"`, `image_hash -> "hero"`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub refs: BTreeMap<String, String>,
    /// Preserve this entity even if the workflow rolls back.
    #[serde(default)]
    pub keep: bool,
    /// Platform fields passed through to the creator.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Kind of remote entity in the campaign hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    AdSet,
    Creative,
    Ad,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Campaign => "campaign",
            EntityType::AdSet => "ad_set",
            EntityType::Creative => "creative",
            EntityType::Ad => "ad",
        }
    }

    /// The entity type a parent reference must point at, if any.
    pub fn parent_type(&self) -> Option<EntityType> {
        match self {
            EntityType::AdSet => Some(EntityType::Campaign),
            EntityType::Ad => Some(EntityType::AdSet),
            EntityType::Campaign | EntityType::Creative => None,
        }
    }

    /// Deletion rank: lower ranks must be deleted before higher ones.
    pub fn deletion_rank(&self) -> u8 {
        match self {
            EntityType::Ad => 0,
            EntityType::Creative => 1,
            EntityType::AdSet => 2,
            EntityType::Campaign => 3,
        }
    }
}

/// Field changes for an existing entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity_type: EntityType,
    pub external_id: String,
    pub fields: Map<String, Value>,
}

/// Reference to an existing entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub external_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Video,
}

/// An image or video to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub key: String,
    pub kind: AssetKind,
    /// Local file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Remote URL the platform should fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AssetSpec {
    /// Content-independent identity of the asset source, used as the asset
    /// cache key. The local key is deliberately excluded so two requests
    /// uploading the same file share a cache entry.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(match self.kind {
            AssetKind::Image => b"image".as_slice(),
            AssetKind::Video => b"video".as_slice(),
        });
        hasher.update([0u8]);
        hasher.update(self.path.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.url.as_deref().unwrap_or("").as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Platform reference to an uploaded asset (image hash or video id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHandle {
    pub kind: AssetKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Inclusive date range for insights queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

/// One insights query against an existing entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightsQuerySpec {
    pub entity_id: String,
    pub date_range: DateRange,
    pub metrics: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    UploadAsset,
    CreateEntity,
    UpdateEntity,
    DeleteEntity,
    Query,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::UploadAsset => "upload_asset",
            TaskKind::CreateEntity => "create_entity",
            TaskKind::UpdateEntity => "update_entity",
            TaskKind::DeleteEntity => "delete_entity",
            TaskKind::Query => "query",
        }
    }
}

/// Task status: `Pending -> Running -> Succeeded | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// What a task does, with everything needed to execute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskPayload {
    UploadAsset {
        asset: AssetSpec,
    },
    CreateEntity {
        entity_type: EntityType,
        key: String,
        /// Task creating the parent, when the parent is part of this request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_task: Option<String>,
        /// Existing external parent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        /// Field name -> task id whose output fills the field.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        refs: BTreeMap<String, String>,
        #[serde(default)]
        keep: bool,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    UpdateEntity {
        entity_type: EntityType,
        external_id: String,
        fields: Map<String, Value>,
    },
    DeleteEntity {
        entity_type: EntityType,
        external_id: String,
    },
    Query {
        entity_id: String,
        date_range: DateRange,
        metrics: Vec<String>,
    },
}

/// Successful output of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum TaskOutput {
    Created(CreatedResource),
    Uploaded(AssetHandle),
    Updated { external_id: String },
    Deleted { external_id: String },
    Rows { rows: Vec<Value> },
}

impl TaskOutput {
    /// The external identifier a dependent task can reference, if any.
    pub fn external_ref(&self) -> Option<&str> {
        match self {
            TaskOutput::Created(resource) => Some(&resource.external_id),
            TaskOutput::Uploaded(handle) => Some(&handle.id),
            TaskOutput::Updated { external_id } | TaskOutput::Deleted { external_id } => {
                Some(external_id)
            }
            TaskOutput::Rows { .. } => None,
        }
    }
}

/// One atomic operation against the ad platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Deterministic ID (`<kind>:<key>`), unique within a workflow.
    pub task_id: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    /// Attempts made so far (1-based once the task has run).
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Task {
    /// Create a pending task.
    pub fn new(
        task_id: impl Into<String>,
        kind: TaskKind,
        depends_on: BTreeSet<String>,
        payload: TaskPayload,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            depends_on,
            payload,
            status: TaskStatus::Pending,
            attempt: 0,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Put the task back to `Pending`, dropping any recorded outcome.
    /// The attempt counter is kept.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.result = None;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
    }
}

// ---------------------------------------------------------------------------
// Created resources and rollback
// ---------------------------------------------------------------------------

/// Append-only record of a remote entity created by a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    pub resource_type: EntityType,
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Task that created the resource.
    pub task_id: String,
    /// Never deleted by rollback.
    #[serde(default)]
    pub keep: bool,
}

/// A resource rollback attempted but failed to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedResource {
    pub resource: CreatedResource,
    pub error: String,
}

/// Outcome of undoing a workflow's created resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Deleted resources, in deletion order.
    #[serde(default)]
    pub deleted: Vec<CreatedResource>,
    #[serde(default)]
    pub orphaned: Vec<OrphanedResource>,
    /// Resources preserved because they were flagged `keep`.
    #[serde(default)]
    pub kept: Vec<CreatedResource>,
}

impl RollbackReport {
    /// True when nothing was orphaned.
    pub fn is_complete(&self) -> bool {
        self.orphaned.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::RolledBack => "rolled_back",
        }
    }
}

/// Checkpointed progress of one workflow. Mutated only by the engine that
/// owns the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub request_id: String,
    /// The original request, kept for resume.
    pub request: WorkflowRequest,
    /// Tasks ordered by dependency depth.
    pub tasks: Vec<Task>,
    /// Oldest first.
    #[serde(default)]
    pub created_resources: Vec<CreatedResource>,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh running state for an accepted request.
    pub fn new(request: WorkflowRequest, tasks: Vec<Task>) -> Self {
        let now = Utc::now();
        Self {
            request_id: request.request_id.clone(),
            request,
            tasks,
            created_resources: Vec::new(),
            status: WorkflowStatus::Running,
            error: None,
            rollback: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status != WorkflowStatus::Running
    }

    /// Build the caller-facing result from this state.
    pub fn to_result(&self) -> WorkflowResult {
        let (resources, rolled_back, orphaned, kept) = match &self.rollback {
            Some(report) => {
                let mut remaining: Vec<CreatedResource> = report.kept.clone();
                remaining.extend(report.orphaned.iter().map(|o| o.resource.clone()));
                (
                    remaining,
                    report.deleted.clone(),
                    report.orphaned.clone(),
                    report.kept.clone(),
                )
            }
            None => (self.created_resources.clone(), vec![], vec![], vec![]),
        };

        let failed_tasks = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| FailedTask {
                task_id: t.task_id.clone(),
                error: t.error.clone().unwrap_or_default(),
            })
            .collect();

        let queries = self
            .tasks
            .iter()
            .filter_map(|t| match &t.result {
                Some(TaskOutput::Rows { rows }) => Some((t.task_id.clone(), rows.clone())),
                _ => None,
            })
            .collect();

        let tasks = self.tasks.iter().map(TaskTiming::from).collect();

        WorkflowResult {
            request_id: self.request_id.clone(),
            status: self.status,
            dry_run: false,
            resources,
            rolled_back,
            orphaned,
            kept,
            failed_tasks,
            queries,
            tasks,
            cause: self.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Per-task status and timing, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl From<&Task> for TaskTiming {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            kind: task.kind,
            status: task.status,
            attempts: task.attempt,
            started_at: task.started_at,
            completed_at: task.completed_at,
            duration_ms: task.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task_id: String,
    pub error: String,
}

/// Consolidated outcome returned to the caller (and cached under the
/// idempotency key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub request_id: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub dry_run: bool,
    /// Created resources still in place.
    #[serde(default)]
    pub resources: Vec<CreatedResource>,
    #[serde(default)]
    pub rolled_back: Vec<CreatedResource>,
    #[serde(default)]
    pub orphaned: Vec<OrphanedResource>,
    #[serde(default)]
    pub kept: Vec<CreatedResource>,
    #[serde(default)]
    pub failed_tasks: Vec<FailedTask>,
    /// Query task id -> rows.
    #[serde(default)]
    pub queries: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub tasks: Vec<TaskTiming>,
    /// Human-readable cause of a non-completed outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
