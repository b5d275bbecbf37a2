//! Workflow commands: validate a file, run a workflow to completion, and
//! browse the built-in templates.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;

use taskloom_core::executor::BoxTaskExecutor;
use taskloom_core::workflow::definition::{
    load_workflow_file, seed_variables, serialize_workflow_yaml, validate_definition,
};
use taskloom_core::workflow::templates;
use taskloom_infra::executor::HttpTaskExecutor;
use taskloom_types::event::ExecutionEvent;
use taskloom_types::execution::ExecutionStatus;
use taskloom_types::workflow::WorkflowDefinition;

use crate::cli::execution::print_execution;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(file: &Path, json: bool) -> Result<()> {
    let def = load_workflow_file(file)
        .with_context(|| format!("failed to load workflow {}", file.display()))?;
    let graph = validate_definition(&def, None)?;
    let seeds = seed_variables(&def)?;

    let waves: Vec<Vec<&str>> = graph
        .waves()
        .iter()
        .map(|wave| wave.iter().map(|&i| def.tasks[i].id.as_str()).collect())
        .collect();

    if json {
        let out = serde_json::json!({
            "id": def.id,
            "name": def.name,
            "tasks": def.tasks.len(),
            "waves": waves,
            "seed_variables": seeds,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid ({} tasks)",
        style("*").green().bold(),
        style(&def.id).cyan(),
        def.tasks.len()
    );
    for (n, wave) in waves.iter().enumerate() {
        println!("  Wave {}: {}", n + 1, wave.join(", "));
    }
    if seeds.is_empty() {
        println!("  Seed variables: none");
    } else {
        println!("  Seed variables: {}", seeds.join(", "));
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run(
    state: &AppState,
    target: &str,
    vars: Vec<(String, Value)>,
    executor_url: Option<String>,
    json: bool,
) -> Result<()> {
    let definition = resolve_target(target)?;
    let workflow_id = definition.id.clone();

    let Some(url) = executor_url.or_else(|| state.config.executor_url.clone()) else {
        bail!(
            "no executor configured: pass --executor-url, set TASKLOOM_EXECUTOR_URL, \
             or add executor_url to {}",
            state.data_dir.join("config.toml").display()
        );
    };
    let executor = HttpTaskExecutor::new(url).context("failed to build executor client")?;
    let engine = state.engine(BoxTaskExecutor::new(executor));

    let recovered = engine.recover_interrupted().await?;
    if recovered > 0 && !json {
        println!(
            "  {} Marked {recovered} interrupted execution(s) as failed",
            style("!").yellow().bold()
        );
    }

    engine.register_workflow(definition).await?;
    let seeds: Map<String, Value> = vars.into_iter().collect();
    let execution = engine.create_execution(&workflow_id, seeds).await?;
    let execution_id = execution.id;

    let printer = (!json).then(|| {
        let mut events = engine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.execution_id() == execution_id => {
                        print_event(&event);
                        if matches!(event, ExecutionEvent::ExecutionFinished { .. }) {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "progress output fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    engine.start(execution_id).await?;

    let finished = tokio::select! {
        result = engine.wait(execution_id) => result?,
        _ = tokio::signal::ctrl_c() => {
            if !json {
                println!("  {} Cancelling...", style("!").yellow().bold());
            }
            engine.cancel(execution_id).await?;
            engine.wait(execution_id).await?
        }
    };
    engine.shutdown().await;

    if let Some(printer) = printer {
        // The finish event is already queued once wait returns
        if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
            tracing::debug!("progress printer did not see the finish event");
        }
    }

    print_execution(&finished, json)?;

    if finished.status != ExecutionStatus::Completed {
        bail!("execution {execution_id} {}", finished.status);
    }
    Ok(())
}

/// A path to a workflow file, or the id of a built-in template.
fn resolve_target(target: &str) -> Result<WorkflowDefinition> {
    let path = Path::new(target);
    if path.is_file() {
        return load_workflow_file(path)
            .with_context(|| format!("failed to load workflow {}", path.display()));
    }
    match templates::find(target) {
        Some(template) => Ok(template),
        None => bail!(
            "'{target}' is neither a workflow file nor a built-in template (see `taskloom templates`)"
        ),
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::ExecutionStarted { workflow_id, .. } => {
            println!(
                "  {} Running '{}'",
                style(">").cyan().bold(),
                style(workflow_id).cyan()
            );
        }
        ExecutionEvent::TaskStarted {
            task_id, attempt, ..
        } => {
            if *attempt > 1 {
                println!("    {} {task_id} (attempt {attempt})", style("-").dim());
            } else {
                println!("    {} {task_id}", style("-").dim());
            }
        }
        ExecutionEvent::TaskCompleted {
            task_id,
            duration_ms,
            ..
        } => {
            println!("    {} {task_id} ({duration_ms}ms)", style("✓").green());
        }
        ExecutionEvent::TaskFailed {
            task_id,
            kind,
            error,
            will_retry,
            ..
        } => {
            let mark = if *will_retry {
                style("↻").yellow()
            } else {
                style("✗").red()
            };
            println!("    {mark} {task_id}: [{kind}] {error}");
        }
        ExecutionEvent::TaskRetrying {
            task_id,
            next_attempt,
            delay_ms,
            ..
        } => {
            println!(
                "      {}",
                style(format!("{task_id}: attempt {next_attempt} in {delay_ms}ms")).dim()
            );
        }
        ExecutionEvent::TaskSkipped { task_id, .. } => {
            println!("    {} {task_id} skipped", style("○").dim());
        }
        ExecutionEvent::CancellationRequested { .. } => {
            println!("  {} Cancellation requested", style("!").yellow().bold());
        }
        ExecutionEvent::ExecutionFinished { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

pub fn templates(id: Option<&str>, json: bool) -> Result<()> {
    if let Some(id) = id {
        let Some(template) = templates::find(id) else {
            bail!("no built-in template '{id}'");
        };
        if json {
            println!("{}", serde_json::to_string_pretty(&template)?);
        } else {
            print!("{}", serialize_workflow_yaml(&template)?);
        }
        return Ok(());
    }

    let builtin = templates::builtin();

    if json {
        let out = builtin
            .iter()
            .map(|t| {
                Ok(serde_json::json!({
                    "id": t.id,
                    "name": t.name,
                    "description": t.description,
                    "tasks": t.tasks.len(),
                    "seed_variables": seed_variables(t)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Tasks"),
            Cell::new("Seed variables"),
        ]);

    for template in &builtin {
        table.add_row(vec![
            Cell::new(&template.id),
            Cell::new(&template.name),
            Cell::new(template.tasks.len()),
            Cell::new(seed_variables(template)?.join(", ")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  Run one with: {}",
        style("taskloom run <id> --var KEY=VALUE --executor-url <url>").dim()
    );
    println!();
    Ok(())
}
