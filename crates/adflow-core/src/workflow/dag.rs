//! Task DAG: cycle detection, depth waves and readiness gating.
//!
//! Uses `petgraph` to model task dependencies as a directed graph. Topological
//! sort detects cycles, and depth-based grouping produces waves of tasks that
//! may run concurrently. [`ReadinessGate`] decides, during execution, which
//! pending tasks may start.

use std::collections::{BTreeSet, HashMap, HashSet};

use adflow_types::workflow::{Task, TaskStatus};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::plan::WorkflowError;

// ---------------------------------------------------------------------------
// Depths and waves
// ---------------------------------------------------------------------------

/// Build the dependency graph and return each task's depth (roots are 0,
/// otherwise one more than the deepest dependency).
fn compute_depths(tasks: &[Task]) -> Result<HashMap<&str, usize>, WorkflowError> {
    let id_to_idx: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.task_id.as_str(), i))
        .collect();

    // Edge from dependency -> dependent
    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = tasks
        .iter()
        .map(|t| graph.add_node(t.task_id.as_str()))
        .collect();

    for task in tasks {
        let to_idx = id_to_idx[task.task_id.as_str()];
        for dep in &task.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.task_id, dep
                ))
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let task_id = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("cycle detected involving task '{task_id}'"))
    })?;

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node_idx in sorted {
        let task_id = graph[node_idx];
        let depth = by_id[task_id]
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(task_id, depth);
    }

    Ok(depths)
}

/// Group tasks into waves by depth. Index 0 is the first wave to execute;
/// within a wave, tasks keep their input order.
pub fn build_execution_plan(tasks: &[Task]) -> Result<Vec<Vec<&Task>>, WorkflowError> {
    if tasks.is_empty() {
        return Ok(vec![]);
    }

    let depths = compute_depths(tasks)?;
    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&Task>> = vec![vec![]; max_depth + 1];
    for task in tasks {
        waves[depths[task.task_id.as_str()]].push(task);
    }
    Ok(waves)
}

/// Validate that tasks form a DAG (no cycles, all references exist).
pub fn validate_dag(tasks: &[Task]) -> Result<(), WorkflowError> {
    compute_depths(tasks).map(|_| ())
}

/// Reorder tasks by depth, stable within a depth.
pub fn sort_by_depth(tasks: Vec<Task>) -> Result<Vec<Task>, WorkflowError> {
    let order: HashMap<String, usize> = compute_depths(&tasks)?
        .into_iter()
        .map(|(id, depth)| (id.to_string(), depth))
        .collect();
    let mut tasks = tasks;
    tasks.sort_by_key(|t| order[t.task_id.as_str()]);
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Transitive dependents
// ---------------------------------------------------------------------------

/// Every task that depends on `task_id`, directly or transitively.
pub fn get_dependents<'a>(task_id: &str, tasks: &'a [Task]) -> BTreeSet<&'a str> {
    let mut visited = BTreeSet::new();
    let mut stack = vec![task_id.to_string()];

    while let Some(current) = stack.pop() {
        for task in tasks {
            if task.depends_on.contains(&current) && visited.insert(task.task_id.as_str()) {
                stack.push(task.task_id.clone());
            }
        }
    }

    visited
}

// ---------------------------------------------------------------------------
// Readiness gate
// ---------------------------------------------------------------------------

/// Decides which pending tasks may start.
///
/// The wave of a task `D` is `D` plus every task of the same depth sharing at
/// least one dependency with `D`. A task is ready when all its dependencies
/// have succeeded and every task in each dependency's wave has resolved.
/// Unrelated branches never block one another.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    waves: HashMap<String, Vec<String>>,
}

impl ReadinessGate {
    pub fn new(tasks: &[Task]) -> Result<Self, WorkflowError> {
        let depths = compute_depths(tasks)?;
        let mut waves = HashMap::new();

        for task in tasks {
            let depth = depths[task.task_id.as_str()];
            let mut wave = vec![task.task_id.clone()];
            if !task.depends_on.is_empty() {
                wave.extend(
                    tasks
                        .iter()
                        .filter(|other| other.task_id != task.task_id)
                        .filter(|other| depths[other.task_id.as_str()] == depth)
                        .filter(|other| !other.depends_on.is_disjoint(&task.depends_on))
                        .map(|other| other.task_id.clone()),
                );
            }
            waves.insert(task.task_id.clone(), wave);
        }

        Ok(Self { waves })
    }

    /// Pending tasks that may start now, in task order.
    pub fn ready<'a>(&self, tasks: &'a [Task]) -> Vec<&'a str> {
        let status: HashMap<&str, TaskStatus> =
            tasks.iter().map(|t| (t.task_id.as_str(), t.status)).collect();
        let resolved = |id: &str| status.get(id).is_some_and(|s| s.is_resolved());

        tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.depends_on.iter().all(|dep| {
                    status.get(dep.as_str()) == Some(&TaskStatus::Succeeded)
                        && self
                            .waves
                            .get(dep)
                            .is_some_and(|wave| wave.iter().all(|id| resolved(id)))
                })
            })
            .map(|t| t.task_id.as_str())
            .collect()
    }

    /// The wave of `task_id` (itself included).
    pub fn wave_of(&self, task_id: &str) -> Option<&[String]> {
        self.waves.get(task_id).map(Vec::as_slice)
    }
}

/// Task ids whose dependencies include a failed task, directly or
/// transitively. These can never run.
pub fn unreachable(tasks: &[Task]) -> HashSet<&str> {
    let mut blocked = HashSet::new();
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
        blocked.extend(get_dependents(&task.task_id, tasks));
    }
    blocked
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
