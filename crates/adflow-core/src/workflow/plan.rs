//! Request validation and task planning.
//!
//! Turns a [`WorkflowRequest`] into the ordered task list the engine runs.
//! Task ids are deterministic (`<kind>:<key>` or `<kind>:<index>`), so
//! planning the same request twice yields identical tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use adflow_types::workflow::{
    EntitySpec, EntityType, InvalidRequest, Task, TaskKind, TaskPayload, WorkflowPayload,
    WorkflowRequest, WorkflowType,
};

use super::dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while validating or planning a request.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The request could not be parsed.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Two entities or assets share a key.
    #[error("duplicate key: '{0}'")]
    DuplicateKey(String),

    /// A parent or reference names a key that is not in the request.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// Dependency graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),
}

impl From<InvalidRequest> for WorkflowError {
    fn from(err: InvalidRequest) -> Self {
        WorkflowError::ParseError(err.0)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Validate `request` and build its tasks, ordered by dependency depth.
pub fn plan(request: &WorkflowRequest) -> Result<Vec<Task>, WorkflowError> {
    validate_request(request)?;

    let payload = &request.payload;
    let tasks = match request.workflow_type {
        WorkflowType::FullHierarchy => plan_hierarchy(payload)?,
        WorkflowType::Update => plan_updates(payload),
        WorkflowType::DeleteCascade => plan_deletions(payload),
        WorkflowType::InsightsFetch => plan_queries(payload),
    };

    dag::validate_dag(&tasks)?;
    dag::sort_by_depth(tasks)
}

/// Checks that do not need the task graph:
/// - request id is non-empty
/// - the payload has work for the workflow type and nothing for other types
/// - updates, deletions and queries are well formed
pub fn validate_request(request: &WorkflowRequest) -> Result<(), WorkflowError> {
    if request.request_id.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "request_id must not be empty".to_string(),
        ));
    }

    let payload = &request.payload;
    let workflow_type = request.workflow_type;
    if payload.is_empty_for(workflow_type) {
        return Err(WorkflowError::ValidationError(format!(
            "payload has nothing to do for workflow type '{}'",
            workflow_type.as_str()
        )));
    }
    for other in [
        WorkflowType::FullHierarchy,
        WorkflowType::Update,
        WorkflowType::DeleteCascade,
        WorkflowType::InsightsFetch,
    ] {
        if other != workflow_type && !payload.is_empty_for(other) {
            return Err(WorkflowError::ValidationError(format!(
                "payload contains '{}' sections but workflow type is '{}'",
                other.as_str(),
                workflow_type.as_str()
            )));
        }
    }

    for update in &payload.updates {
        if update.external_id.is_empty() {
            return Err(WorkflowError::ValidationError(
                "update is missing external_id".to_string(),
            ));
        }
        if update.fields.is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "update of {} '{}' has no fields",
                update.entity_type.as_str(),
                update.external_id
            )));
        }
    }
    for deletion in &payload.deletions {
        if deletion.external_id.is_empty() {
            return Err(WorkflowError::ValidationError(
                "deletion is missing external_id".to_string(),
            ));
        }
    }
    for query in &payload.queries {
        if query.entity_id.is_empty() {
            return Err(WorkflowError::ValidationError(
                "query is missing entity_id".to_string(),
            ));
        }
        if query.date_range.since > query.date_range.until {
            return Err(WorkflowError::ValidationError(format!(
                "query for '{}' has since after until",
                query.entity_id
            )));
        }
        if query.metrics.is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "query for '{}' requests no metrics",
                query.entity_id
            )));
        }
    }

    Ok(())
}

/// Key -> (task id, entity type or `None` for assets).
type KeyIndex<'a> = HashMap<&'a str, (String, Option<EntityType>)>;

fn plan_hierarchy(payload: &WorkflowPayload) -> Result<Vec<Task>, WorkflowError> {
    let entities = hierarchy_entities(payload);

    let mut entries: Vec<(&str, String, Option<EntityType>)> = Vec::new();
    for asset in &payload.assets {
        if asset.path.is_none() && asset.url.is_none() {
            return Err(WorkflowError::ValidationError(format!(
                "asset '{}' needs a path or a url",
                asset.key
            )));
        }
        entries.push((&asset.key, format!("asset:{}", asset.key), None));
    }
    for (entity_type, spec) in &entities {
        entries.push((
            &spec.key,
            task_id(*entity_type, &spec.key),
            Some(*entity_type),
        ));
    }

    let mut index: KeyIndex = HashMap::new();
    for (key, task_id, entity) in entries {
        if key.is_empty() {
            return Err(WorkflowError::ValidationError(
                "entity and asset keys must not be empty".to_string(),
            ));
        }
        if index.insert(key, (task_id, entity)).is_some() {
            return Err(WorkflowError::DuplicateKey(key.to_string()));
        }
    }

    let mut tasks = Vec::new();
    for asset in &payload.assets {
        tasks.push(Task::new(
            format!("asset:{}", asset.key),
            TaskKind::UploadAsset,
            BTreeSet::new(),
            TaskPayload::UploadAsset {
                asset: asset.clone(),
            },
        ));
    }

    let implicit_campaign = payload.campaign.as_ref().map(|c| c.key.as_str());
    for (entity_type, spec) in &entities {
        tasks.push(plan_entity(*entity_type, spec, &index, implicit_campaign)?);
    }

    Ok(tasks)
}

/// Entities in creation order: campaign, ad sets, creatives, ads.
fn hierarchy_entities(payload: &WorkflowPayload) -> Vec<(EntityType, &EntitySpec)> {
    let mut entities = Vec::new();
    if let Some(campaign) = &payload.campaign {
        entities.push((EntityType::Campaign, campaign));
    }
    entities.extend(payload.ad_sets.iter().map(|s| (EntityType::AdSet, s)));
    entities.extend(payload.creatives.iter().map(|s| (EntityType::Creative, s)));
    entities.extend(payload.ads.iter().map(|s| (EntityType::Ad, s)));
    entities
}

fn task_id(entity_type: EntityType, key: &str) -> String {
    format!("{}:{key}", entity_type.as_str())
}

fn plan_entity(
    entity_type: EntityType,
    spec: &EntitySpec,
    index: &KeyIndex,
    implicit_campaign: Option<&str>,
) -> Result<Task, WorkflowError> {
    let id = task_id(entity_type, &spec.key);
    let mut depends_on = BTreeSet::new();

    if spec.parent.is_some() && spec.parent_id.is_some() {
        return Err(WorkflowError::ValidationError(format!(
            "{} '{}' sets both parent and parent_id",
            entity_type.as_str(),
            spec.key
        )));
    }

    let parent_key = match (entity_type, spec.parent.as_deref()) {
        (EntityType::AdSet, None) if spec.parent_id.is_none() => implicit_campaign,
        (_, parent) => parent,
    };

    let parent_task = match (entity_type.parent_type(), parent_key) {
        (None, Some(parent)) => {
            return Err(WorkflowError::ValidationError(format!(
                "{} '{}' cannot have a parent (got '{parent}')",
                entity_type.as_str(),
                spec.key
            )));
        }
        (None, None) => None,
        (Some(expected), Some(parent)) => {
            let (parent_task, parent_type) = index.get(parent).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!(
                    "{} '{}' has unknown parent '{parent}'",
                    entity_type.as_str(),
                    spec.key
                ))
            })?;
            if *parent_type != Some(expected) {
                return Err(WorkflowError::ValidationError(format!(
                    "{} '{}' must have a {} parent, '{parent}' is not one",
                    entity_type.as_str(),
                    spec.key,
                    expected.as_str()
                )));
            }
            depends_on.insert(parent_task.clone());
            Some(parent_task.clone())
        }
        (Some(expected), None) => {
            if spec.parent_id.is_none() {
                return Err(WorkflowError::ValidationError(format!(
                    "{} '{}' needs a {} parent or parent_id",
                    entity_type.as_str(),
                    spec.key,
                    expected.as_str()
                )));
            }
            None
        }
    };

    let mut refs = BTreeMap::new();
    for (field, key) in &spec.refs {
        if key == &spec.key {
            return Err(WorkflowError::CycleDetected(format!(
                "{} '{}' references itself",
                entity_type.as_str(),
                spec.key
            )));
        }
        let (ref_task, _) = index.get(key.as_str()).ok_or_else(|| {
            WorkflowError::UnknownDependency(format!(
                "{} '{}' field '{field}' references unknown key '{key}'",
                entity_type.as_str(),
                spec.key
            ))
        })?;
        depends_on.insert(ref_task.clone());
        refs.insert(field.clone(), ref_task.clone());
    }

    Ok(Task::new(
        id,
        TaskKind::CreateEntity,
        depends_on,
        TaskPayload::CreateEntity {
            entity_type,
            key: spec.key.clone(),
            parent_task,
            parent_id: spec.parent_id.clone(),
            refs,
            keep: spec.keep,
            fields: spec.fields.clone(),
        },
    ))
}

fn plan_updates(payload: &WorkflowPayload) -> Vec<Task> {
    payload
        .updates
        .iter()
        .enumerate()
        .map(|(i, update)| {
            Task::new(
                format!("update:{i}"),
                TaskKind::UpdateEntity,
                BTreeSet::new(),
                TaskPayload::UpdateEntity {
                    entity_type: update.entity_type,
                    external_id: update.external_id.clone(),
                    fields: update.fields.clone(),
                },
            )
        })
        .collect()
}

/// Each deletion depends on every deletion of a lower hierarchy rank, so
/// ads go before creatives, creatives before ad sets, ad sets before
/// campaigns.
fn plan_deletions(payload: &WorkflowPayload) -> Vec<Task> {
    let ids: Vec<(String, EntityType)> = payload
        .deletions
        .iter()
        .enumerate()
        .map(|(i, d)| (format!("delete:{i}"), d.entity_type))
        .collect();

    payload
        .deletions
        .iter()
        .zip(&ids)
        .map(|(deletion, (id, entity_type))| {
            let depends_on = ids
                .iter()
                .filter(|(_, other)| other.deletion_rank() < entity_type.deletion_rank())
                .map(|(other_id, _)| other_id.clone())
                .collect();
            Task::new(
                id.clone(),
                TaskKind::DeleteEntity,
                depends_on,
                TaskPayload::DeleteEntity {
                    entity_type: deletion.entity_type,
                    external_id: deletion.external_id.clone(),
                },
            )
        })
        .collect()
}

fn plan_queries(payload: &WorkflowPayload) -> Vec<Task> {
    payload
        .queries
        .iter()
        .enumerate()
        .map(|(i, query)| {
            Task::new(
                format!("query:{i}"),
                TaskKind::Query,
                BTreeSet::new(),
                TaskPayload::Query {
                    entity_id: query.entity_id.clone(),
                    date_range: query.date_range,
                    metrics: query.metrics.clone(),
                },
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> WorkflowRequest {
        WorkflowRequest::from_json(json).unwrap()
    }

    fn hierarchy() -> WorkflowRequest {
        request(
            r#"{
                "request_id": "r1",
                "workflow_type": "full_hierarchy",
                "payload": {
                    "assets": [{"key": "hero", "kind": "image", "path": "hero.png"}],
                    "campaign": {"key": "camp", "fields": {"name": "C"}},
                    "ad_sets": [{"key": "s1"}, {"key": "s2", "parent": "camp"}],
                    "creatives": [{"key": "cr", "refs": {"image_hash": "hero"}}],
                    "ads": [{"key": "ad", "parent": "s1", "refs": {"creative_id": "cr"}}]
                }
            }"#,
        )
    }

    fn task<'a>(tasks: &'a [Task], id: &str) -> &'a Task {
        tasks.iter().find(|t| t.task_id == id).unwrap()
    }

    #[test]
    fn test_plan_full_hierarchy() {
        let tasks = plan(&hierarchy()).unwrap();
        assert_eq!(tasks.len(), 6);

        // Implicit campaign parent for s1.
        assert!(task(&tasks, "ad_set:s1").depends_on.contains("campaign:camp"));
        assert!(task(&tasks, "ad_set:s2").depends_on.contains("campaign:camp"));
        assert!(task(&tasks, "creative:cr").depends_on.contains("asset:hero"));

        let ad = task(&tasks, "ad:ad");
        let deps: Vec<&str> = ad.depends_on.iter().map(String::as_str).collect();
        assert_eq!(deps, vec!["ad_set:s1", "creative:cr"]);

        // Depth order: roots first.
        let position = |id: &str| tasks.iter().position(|t| t.task_id == id).unwrap();
        assert!(position("campaign:camp") < position("ad_set:s1"));
        assert!(position("creative:cr") < position("ad:ad"));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let a = plan(&hierarchy()).unwrap();
        let b = plan(&hierarchy()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "full_hierarchy",
                "payload": {"campaign": {"key": "x"}, "ad_sets": [{"key": "x"}]}}"#,
        );
        assert!(matches!(plan(&req), Err(WorkflowError::DuplicateKey(k)) if k == "x"));
    }

    #[test]
    fn test_ad_parent_must_be_ad_set() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "full_hierarchy",
                "payload": {"campaign": {"key": "c"}, "ads": [{"key": "a", "parent": "c"}]}}"#,
        );
        let err = plan(&req).unwrap_err();
        assert!(err.to_string().contains("ad_set parent"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "full_hierarchy",
                "payload": {"creatives": [{"key": "cr", "refs": {"image_hash": "nope"}}]}}"#,
        );
        assert!(matches!(plan(&req), Err(WorkflowError::UnknownDependency(_))));
    }

    #[test]
    fn test_reference_cycle_rejected() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "full_hierarchy",
                "payload": {"creatives": [
                    {"key": "a", "refs": {"x": "b"}},
                    {"key": "b", "refs": {"x": "a"}}
                ]}}"#,
        );
        assert!(matches!(plan(&req), Err(WorkflowError::CycleDetected(_))));
    }

    #[test]
    fn test_existing_parent_id_has_no_edge() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "full_hierarchy",
                "payload": {"ad_sets": [{"key": "s", "parent_id": "120000"}]}}"#,
        );
        let tasks = plan(&req).unwrap();
        assert!(tasks[0].depends_on.is_empty());
    }

    #[test]
    fn test_empty_payload_rejected() {
        let req = request(r#"{"request_id": "r", "workflow_type": "update"}"#);
        assert!(matches!(plan(&req), Err(WorkflowError::ValidationError(_))));
    }

    #[test]
    fn test_mixed_sections_rejected() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "update",
                "payload": {
                    "updates": [{"entity_type": "campaign", "external_id": "1", "fields": {"status": "PAUSED"}}],
                    "deletions": [{"entity_type": "ad", "external_id": "2"}]
                }}"#,
        );
        assert!(plan(&req).unwrap_err().to_string().contains("delete_cascade"));
    }

    #[test]
    fn test_deletions_children_first() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "delete_cascade",
                "payload": {"deletions": [
                    {"entity_type": "campaign", "external_id": "c"},
                    {"entity_type": "ad_set", "external_id": "s"},
                    {"entity_type": "ad", "external_id": "a1"},
                    {"entity_type": "ad", "external_id": "a2"}
                ]}}"#,
        );
        let tasks = plan(&req).unwrap();
        let order: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(order, vec!["delete:2", "delete:3", "delete:1", "delete:0"]);
        let campaign = task(&tasks, "delete:0");
        assert_eq!(campaign.depends_on.len(), 3);
    }

    #[test]
    fn test_query_date_range_validated() {
        let req = request(
            r#"{"request_id": "r", "workflow_type": "insights_fetch",
                "payload": {"queries": [{"entity_id": "1",
                    "date_range": {"since": "2026-02-01", "until": "2026-01-01"},
                    "metrics": ["spend"]}]}}"#,
        );
        assert!(matches!(plan(&req), Err(WorkflowError::ValidationError(_))));
    }
}
