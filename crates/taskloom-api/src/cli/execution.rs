//! Execution inspection: show, list, and purge stored executions.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use taskloom_core::repository::ExecutionRepository;
use taskloom_types::execution::{Execution, ExecutionStatus, TaskStatus};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

pub async fn show(state: &AppState, execution_id: Uuid, json: bool) -> Result<()> {
    let execution = state
        .repo
        .load_execution(&execution_id)
        .await
        .context("failed to load execution")?
        .with_context(|| format!("execution {execution_id} not found"))?;

    print_execution(&execution, json)
}

/// Render one execution with its task table (or as JSON).
pub fn print_execution(execution: &Execution, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(execution)?);
        return Ok(());
    }

    let progress = execution.progress();
    println!();
    println!(
        "  {} {} ({})",
        style("Execution").bold(),
        style(execution.id).cyan(),
        execution.workflow_id
    );
    println!("  Status:   {}", styled_status(execution.status));
    if let Some(started) = execution.started_at {
        println!("  Started:  {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(duration) = duration_of(execution.started_at, execution.completed_at) {
        println!("  Duration: {duration}");
    }
    println!(
        "  Tasks:    {}/{} completed, {} failed, {} skipped",
        progress.completed, progress.total, progress.failed, progress.skipped
    );
    if let Some(error) = &execution.error {
        println!("  Error:    {}", style(error).red());
    }

    if !execution.tasks.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Task").fg(Color::Cyan),
                Cell::new("Status"),
                Cell::new("Attempts"),
                Cell::new("Duration"),
                Cell::new("Error"),
            ]);

        for task in &execution.tasks {
            let error = task
                .error
                .as_ref()
                .map(|e| format!("[{}] {}", e.kind, e.message))
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(&task.task_id),
                format_task_status(task.status),
                Cell::new(task.attempts),
                Cell::new(duration_of(task.started_at, task.completed_at).unwrap_or_default()),
                Cell::new(error),
            ]);
        }

        println!();
        println!("{table}");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, status: Option<ExecutionStatus>, json: bool) -> Result<()> {
    let executions = state
        .repo
        .list_executions(status)
        .await
        .context("failed to list executions")?;

    if json {
        let out: Vec<_> = executions
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id.to_string(),
                    "workflow_id": e.workflow_id,
                    "status": e.status.as_str(),
                    "started_at": e.started_at.map(|t| t.to_rfc3339()),
                    "completed_at": e.completed_at.map(|t| t.to_rfc3339()),
                    "error": e.error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions found.");
        println!(
            "  Start one with: {}",
            style("taskloom run <file.yaml | template>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Duration"),
        ]);

    for execution in &executions {
        let short_id: String = execution.id.to_string().chars().take(8).collect();
        table.add_row(vec![
            Cell::new(short_id),
            Cell::new(&execution.workflow_id),
            format_status(execution.status),
            Cell::new(
                execution
                    .started_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(
                duration_of(execution.started_at, execution.completed_at)
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Purge
// ---------------------------------------------------------------------------

pub async fn purge(state: &AppState, execution_id: Uuid, json: bool) -> Result<()> {
    let execution = state
        .repo
        .load_execution(&execution_id)
        .await
        .context("failed to load execution")?
        .with_context(|| format!("execution {execution_id} not found"))?;

    if !execution.status.is_terminal() {
        bail!(
            "execution {execution_id} is {} and cannot be purged",
            execution.status
        );
    }

    state
        .repo
        .delete_execution(&execution_id)
        .await
        .context("failed to delete execution")?;
    tracing::info!(execution_id = %execution_id, "execution purged");

    if json {
        let out = serde_json::json!({ "id": execution_id.to_string(), "purged": true });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Purged execution {} ({} tasks)",
            style("*").green().bold(),
            style(execution_id).cyan(),
            execution.tasks.len()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn format_status(status: ExecutionStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ExecutionStatus::Pending => cell.fg(Color::Yellow),
        ExecutionStatus::Running => cell.fg(Color::Blue),
        ExecutionStatus::Completed => cell.fg(Color::Green),
        ExecutionStatus::Failed => cell.fg(Color::Red),
        ExecutionStatus::Cancelled => cell.fg(Color::DarkYellow),
    }
}

fn format_task_status(status: TaskStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        TaskStatus::Pending => cell.fg(Color::Yellow),
        TaskStatus::Running => cell.fg(Color::Blue),
        TaskStatus::Completed => cell.fg(Color::Green),
        TaskStatus::Failed => cell.fg(Color::Red),
        TaskStatus::Skipped => cell.fg(Color::DarkGrey),
    }
}

fn styled_status(status: ExecutionStatus) -> console::StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        ExecutionStatus::Completed => text.green(),
        ExecutionStatus::Failed => text.red(),
        ExecutionStatus::Cancelled | ExecutionStatus::Pending => text.yellow(),
        ExecutionStatus::Running => text.blue(),
    }
}

/// Human-readable elapsed time, e.g. `850ms`, `12.4s`, `3m05s`.
fn duration_of(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<String> {
    let millis = (end? - start?).num_milliseconds().max(0);
    Some(if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", millis / 60_000, (millis % 60_000) / 1000)
    })
}
