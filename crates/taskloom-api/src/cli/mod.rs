//! CLI command definitions for the `taskloom` binary.
//!
//! Uses clap derive macros. Workflow-level commands (`validate`, `run`,
//! `templates`) live in [`workflow`]; execution inspection (`show`, `list`,
//! `purge`) lives in [`execution`].

pub mod execution;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;
use taskloom_types::execution::ExecutionStatus;
use uuid::Uuid;

/// Run dependency-ordered browser automation workflows.
#[derive(Parser)]
#[command(name = "taskloom", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow file and print its execution plan.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Run a workflow file or built-in template to completion.
    Run {
        /// Workflow YAML path or built-in template id.
        target: String,

        /// Seed variable as KEY=VALUE (VALUE parsed as JSON, else a string).
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Base URL of the task executor service.
        #[arg(long, env = "TASKLOOM_EXECUTOR_URL")]
        executor_url: Option<String>,
    },

    /// Show an execution and its task results.
    Show {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// List executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only show executions with this status.
        #[arg(long)]
        status: Option<ExecutionStatus>,
    },

    /// Delete a finished execution and its task results.
    #[command(alias = "rm")]
    Purge {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// List built-in templates, or print one as YAML.
    Templates {
        /// Template id to print.
        id: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse `KEY=VALUE`. Values that are valid JSON keep their type; anything
/// else becomes a string.
fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_collects_vars_in_order() {
        let cli = Cli::try_parse_from([
            "taskloom",
            "run",
            "price-comparison",
            "--var",
            "site1Url=https://a.example",
            "--var",
            "limit=3",
            "--var",
            "tags=[\"x\"]",
            "--executor-url",
            "http://127.0.0.1:9000",
        ])
        .unwrap();

        let Commands::Run {
            target,
            vars,
            executor_url,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(target, "price-comparison");
        assert_eq!(
            vars,
            vec![
                ("site1Url".to_string(), json!("https://a.example")),
                ("limit".to_string(), json!(3)),
                ("tags".to_string(), json!(["x"])),
            ]
        );
        assert_eq!(executor_url.as_deref(), Some("http://127.0.0.1:9000"));
    }

    #[test]
    fn malformed_var_is_rejected() {
        assert!(Cli::try_parse_from(["taskloom", "run", "wf.yaml", "--var", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["taskloom", "run", "wf.yaml", "--var", "=1"]).is_err());
    }

    #[test]
    fn value_may_contain_equals() {
        assert_eq!(
            parse_var("query=a=b").unwrap(),
            ("query".to_string(), json!("a=b"))
        );
    }

    #[test]
    fn list_parses_status_filter() {
        let cli = Cli::try_parse_from(["taskloom", "--json", "ls", "--status", "failed"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::List {
                status: Some(ExecutionStatus::Failed)
            }
        ));
        assert!(Cli::try_parse_from(["taskloom", "list", "--status", "paused"]).is_err());
    }

    #[test]
    fn show_requires_uuid() {
        let id = Uuid::now_v7();
        let cli = Cli::try_parse_from(["taskloom", "show", &id.to_string(), "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Show { execution_id } if execution_id == id));
        assert!(Cli::try_parse_from(["taskloom", "show", "not-a-uuid"]).is_err());
    }
}
