//! Workflow command handlers: submit, resume, status, purge and recover.

use std::path::Path;

use adflow_core::workflow::engine::WorkflowOrchestrator;
use adflow_types::workflow::{
    TaskStatus, WorkflowRequest, WorkflowResult, WorkflowState, WorkflowStatus,
};
use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Submit a request file and print the result.
///
/// Ctrl-C while the workflow runs asks the engine to cancel it; the engine
/// rolls back and the rolled-back result is printed as usual.
pub async fn submit(state: &AppState, file: &Path, dry_run: bool, json: bool) -> Result<()> {
    let request = load_request(file, dry_run).await?;
    if !request.options.dry_run {
        state.require_credentials()?;
    }

    let request_id = request.request_id.clone();
    tracing::info!(request_id = %request_id, workflow_type = request.workflow_type.as_str(), "submitting workflow");

    let engine = state.engine.clone();
    let watched_id = request_id.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  Interrupted, cancelling workflow '{watched_id}'...");
            match engine.cancel(&watched_id).await {
                Ok(ack) if ack.accepted => {}
                Ok(ack) => tracing::warn!(status = ack.status.as_str(), "cancel not accepted"),
                Err(e) => tracing::warn!(error = %e, "cancel failed"),
            }
        }
    });

    let result = state.engine.submit(request).await;
    interrupt.abort();

    let result = result.with_context(|| format!("workflow '{request_id}' failed to run"))?;
    print_result(&result, json)
}

/// Read a request file, filling in a missing `request_id` and applying the
/// `--dry-run` flag.
async fn load_request(file: &Path, dry_run: bool) -> Result<WorkflowRequest> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    parse_request(&content, dry_run)
}

fn parse_request(content: &str, dry_run: bool) -> Result<WorkflowRequest> {
    let mut value: serde_json::Value =
        serde_json::from_str(content).context("request file is not valid JSON")?;

    let object = value
        .as_object_mut()
        .context("request file must contain a JSON object")?;
    let has_id = object
        .get("request_id")
        .and_then(|v| v.as_str())
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        let id = uuid::Uuid::now_v7().to_string();
        tracing::debug!(request_id = %id, "generated request id");
        object.insert("request_id".into(), serde_json::Value::String(id));
    }

    let mut request = WorkflowRequest::from_json(&value.to_string())?;
    if dry_run {
        request.options.dry_run = true;
    }
    Ok(request)
}

// ---------------------------------------------------------------------------
// Resume / recover
// ---------------------------------------------------------------------------

pub async fn resume(state: &AppState, request_id: &str, json: bool) -> Result<()> {
    state.require_credentials()?;
    let result = state
        .engine
        .resume(request_id)
        .await
        .with_context(|| format!("failed to resume '{request_id}'"))?;
    print_result(&result, json)
}

pub async fn recover(state: &AppState, json: bool) -> Result<()> {
    state.require_credentials()?;
    let results = state.engine.recover().await.context("recovery failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!();
        println!("  No interrupted workflows.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Request").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Resources"),
            Cell::new("Rolled back"),
            Cell::new("Cause"),
        ]);
    for result in &results {
        table.add_row(vec![
            Cell::new(&result.request_id),
            workflow_status_cell(result.status),
            Cell::new(result.resources.len()),
            Cell::new(result.rolled_back.len()),
            Cell::new(result.cause.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("  Recovered {} workflow(s)", style(results.len()).bold());
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn status(state: &AppState, request_id: &str, json: bool) -> Result<()> {
    let workflow = state
        .engine
        .status(request_id)
        .await
        .with_context(|| format!("failed to load '{request_id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    print_state(&workflow);
    Ok(())
}

fn print_state(workflow: &WorkflowState) {
    println!();
    println!(
        "  {} {} ({})",
        style("Workflow").bold(),
        style(&workflow.request_id).cyan(),
        workflow.request.workflow_type.as_str()
    );
    println!("  Status:  {}", styled_status(workflow.status));
    println!("  Started: {}", workflow.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated: {}", workflow.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(error) = &workflow.error {
        println!("  Error:   {}", style(error).red());
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Output / Error"),
        ]);
    for task in &workflow.tasks {
        let detail = match (&task.error, &task.result) {
            (Some(error), _) => error.clone(),
            (None, Some(output)) => output.external_ref().unwrap_or("rows").to_string(),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(&task.task_id),
            Cell::new(task.kind.as_str()),
            task_status_cell(task.status),
            Cell::new(task.attempt),
            Cell::new(detail),
        ]);
    }
    println!("{table}");

    if !workflow.created_resources.is_empty() {
        println!();
        println!("  Created resources: {}", workflow.created_resources.len());
        for resource in &workflow.created_resources {
            println!(
                "    {} {} {}",
                style(resource.resource_type.as_str()).dim(),
                resource.external_id,
                style(&resource.task_id).dim()
            );
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Purge
// ---------------------------------------------------------------------------

pub async fn purge(
    state: &AppState,
    request_id: Option<&str>,
    assets: bool,
    json: bool,
) -> Result<()> {
    let cleared = assets.then(|| state.engine.clear_asset_cache());

    match request_id {
        Some(id) => {
            let removed = state
                .engine
                .purge(id)
                .await
                .with_context(|| format!("failed to purge '{id}'"))?;
            if json {
                let out = serde_json::json!({
                    "request_id": id,
                    "removed": removed,
                    "asset_handles": cleared,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if removed {
                println!("  {} Purged workflow '{id}'", style("✓").green());
            } else {
                println!("  Nothing stored for '{id}'");
            }
        }
        None => {
            let report = state.engine.purge_expired().await.context("purge failed")?;
            let asset_handles = report.asset_handles + cleared.unwrap_or(0);
            if json {
                let out = serde_json::json!({
                    "checkpoints": report.checkpoints,
                    "idempotency_records": report.idempotency_records,
                    "asset_handles": asset_handles,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!(
                    "  {} Purged {} checkpoint(s) and {} idempotency record(s) from {}",
                    style("✓").green(),
                    report.checkpoints,
                    report.idempotency_records,
                    state.data_dir.display()
                );
            }
        }
    }

    if let (Some(cleared), false) = (cleared, json) {
        println!("  {} Cleared {cleared} cached asset handle(s)", style("✓").green());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_result(result: &WorkflowResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!();
    let label = if result.dry_run { "Dry run" } else { "Workflow" };
    println!(
        "  {} {}: {}",
        style(label).bold(),
        style(&result.request_id).cyan(),
        styled_status(result.status)
    );
    if let Some(cause) = &result.cause {
        println!("  Cause: {}", style(cause).red());
    }
    println!();

    if !result.tasks.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Task").fg(Color::Cyan),
                Cell::new("Kind"),
                Cell::new("Status"),
                Cell::new("Attempts"),
                Cell::new("Duration"),
            ]);
        for task in &result.tasks {
            let duration = task
                .duration_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "-".into());
            table.add_row(vec![
                Cell::new(&task.task_id),
                Cell::new(task.kind.as_str()),
                task_status_cell(task.status),
                Cell::new(task.attempts),
                Cell::new(duration),
            ]);
        }
        println!("{table}");
        println!();
    }

    let sections = [
        ("Resources", &result.resources),
        ("Rolled back", &result.rolled_back),
        ("Kept", &result.kept),
    ];
    for (title, resources) in sections {
        if resources.is_empty() {
            continue;
        }
        println!("  {title}:");
        for resource in resources {
            println!(
                "    {} {}",
                style(resource.resource_type.as_str()).dim(),
                resource.external_id
            );
        }
    }
    if !result.orphaned.is_empty() {
        println!("  {}:", style("Orphaned").yellow());
        for orphan in &result.orphaned {
            println!(
                "    {} {} ({})",
                style(orphan.resource.resource_type.as_str()).dim(),
                orphan.resource.external_id,
                orphan.error
            );
        }
    }
    for failed in &result.failed_tasks {
        println!("  {} {}: {}", style("✗").red(), failed.task_id, failed.error);
    }
    for (task_id, rows) in &result.queries {
        println!("  {task_id}: {} row(s)", rows.len());
    }
    println!();
    Ok(())
}

fn styled_status(status: WorkflowStatus) -> String {
    match status {
        WorkflowStatus::Running => style("running").blue().to_string(),
        WorkflowStatus::Completed => style("completed").green().to_string(),
        WorkflowStatus::Failed => style("failed").red().to_string(),
        WorkflowStatus::RolledBack => style("rolled back").yellow().to_string(),
    }
}

fn workflow_status_cell(status: WorkflowStatus) -> Cell {
    match status {
        WorkflowStatus::Running => Cell::new("running").fg(Color::Blue),
        WorkflowStatus::Completed => Cell::new("completed").fg(Color::Green),
        WorkflowStatus::Failed => Cell::new("failed").fg(Color::Red),
        WorkflowStatus::RolledBack => Cell::new("rolled back").fg(Color::DarkYellow),
    }
}

fn task_status_cell(status: TaskStatus) -> Cell {
    match status {
        TaskStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        TaskStatus::Running => Cell::new("running").fg(Color::Blue),
        TaskStatus::Succeeded => Cell::new("succeeded").fg(Color::Green),
        TaskStatus::Failed => Cell::new("failed").fg(Color::Red),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"{
        "workflow_type": "insights_fetch",
        "payload": {
            "queries": [{
                "entity_id": "120200000001",
                "metrics": ["impressions"],
                "date_range": {"since": "2026-01-01", "until": "2026-01-31"}
            }]
        }
    }"#;

    #[test]
    fn missing_request_id_is_generated() {
        let request = parse_request(REQUEST, false).unwrap();
        assert!(uuid::Uuid::parse_str(&request.request_id).is_ok());
        assert!(!request.options.dry_run);
    }

    #[test]
    fn explicit_request_id_is_kept_and_dry_run_applied() {
        let with_id = REQUEST.replacen('{', r#"{"request_id": "req-7","#, 1);
        let request = parse_request(&with_id, true).unwrap();
        assert_eq!(request.request_id, "req-7");
        assert!(request.options.dry_run);
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(parse_request("[1, 2]", false).is_err());
        assert!(parse_request("not json", false).is_err());
    }
}
