//! wsm - offline-first workspace, project and task tracking from the terminal
//!
//! Every change lands in the local database first and is queued for the API.

mod cli;
mod commands;
mod config_file;
mod error;


use std::process::ExitCode;

use clap::Parser;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::common::{resolve_db_path, AppContext};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::entity::{run_entity, run_workspace};
use crate::commands::queue::run_queue;
use crate::commands::recovery::run_recovery;
use crate::commands::session::run_session;
use crate::commands::sync::{run_sync, run_sync_conflicts};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["wsm=info", "wsm_core=warn"] {
        if let Ok(directive) = directive.parse::<tracing_subscriber::filter::Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let command = match cli.command {
        Commands::Completions { shell, output } => {
            return run_completions(shell, output.as_deref());
        }
        Commands::Config { command } => return run_config(command),
        other => other,
    };

    let config = config_file::load_effective().map_err(CliError::Config)?;
    let db_path = resolve_db_path(cli.db_path)?;
    let ctx = AppContext::open(&db_path, config, cli.offline).await?;

    let result = dispatch(&ctx, command, cli.offline).await;
    if let Err(error) = &result {
        if error.is_unexpected() {
            if let Some(id) = ctx.recovery.capture_on_error(&ctx.engine, error).await {
                eprintln!("Saved a recovery point of the current state. Restore it with `wsm recovery restore {id}`.");
            }
        }
    }
    result
}

async fn dispatch(ctx: &AppContext, command: Commands, offline: bool) -> Result<(), CliError> {
    match command {
        Commands::Entity { command } => run_entity(ctx, command).await,
        Commands::Workspace { command } => run_workspace(ctx, command).await,
        Commands::Queue { command } => run_queue(ctx, command).await,
        Commands::Sync { command: None } => run_sync(ctx).await,
        Commands::Sync {
            command: Some(SyncCommands::Conflicts { limit, json }),
        } => run_sync_conflicts(ctx, limit, json).await,
        Commands::Recovery { command } => run_recovery(ctx, command).await,
        Commands::Session { command } => run_session(ctx, command).await,
        Commands::Watch => run_watch(ctx, offline).await,
        Commands::Completions { .. } | Commands::Config { .. } => Ok(()),
    }
}
