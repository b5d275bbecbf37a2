//! Taskloom command-line entry point.
//!
//! Binary name: `taskloom`
//!
//! Parses CLI arguments, loads configuration, installs tracing, then
//! dispatches to the command handler. Commands that never touch stored
//! executions (`validate`, `templates`, `completions`) skip opening the
//! database.

mod cli;
mod state;

use clap::{CommandFactory, Parser};
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;
use taskloom_infra::config::{load_app_config, resolve_data_dir};
use taskloom_observe::tracing_setup::{directive_for_verbosity, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or logging
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "taskloom", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    let config = load_app_config(&data_dir).await;

    let directive = if cli.quiet {
        "error"
    } else {
        directive_for_verbosity(cli.verbose)
    };
    init_tracing(config.log_format, directive, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli, data_dir, config).await;
    shutdown_tracing();
    result
}

async fn dispatch(
    cli: Cli,
    data_dir: std::path::PathBuf,
    config: taskloom_types::config::AppConfig,
) -> anyhow::Result<()> {
    let json = cli.json;

    match cli.command {
        Commands::Validate { file } => cli::workflow::validate(&file, json),

        Commands::Templates { id } => cli::workflow::templates(id.as_deref(), json),

        Commands::Run {
            target,
            vars,
            executor_url,
        } => {
            let state = AppState::init(data_dir, config).await?;
            cli::workflow::run(&state, &target, vars, executor_url, json).await
        }

        Commands::Show { execution_id } => {
            let state = AppState::init(data_dir, config).await?;
            cli::execution::show(&state, execution_id, json).await
        }

        Commands::List { status } => {
            let state = AppState::init(data_dir, config).await?;
            cli::execution::list(&state, status, json).await
        }

        Commands::Purge { execution_id } => {
            let state = AppState::init(data_dir, config).await?;
            cli::execution::purge(&state, execution_id, json).await
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
