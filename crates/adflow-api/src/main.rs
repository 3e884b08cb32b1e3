//! adflow CLI entry point.
//!
//! Parses CLI arguments, initializes the database and the engine, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,adflow=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "adflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Submit { file, dry_run } => {
            cli::workflow::submit(&state, &file, dry_run, cli.json).await?;
        }
        Commands::Resume { request_id } => {
            cli::workflow::resume(&state, &request_id, cli.json).await?;
        }
        Commands::Status { request_id } => {
            cli::workflow::status(&state, &request_id, cli.json).await?;
        }
        Commands::Purge { request_id, assets } => {
            cli::workflow::purge(&state, request_id.as_deref(), assets, cli.json).await?;
        }
        Commands::Recover => {
            cli::workflow::recover(&state, cli.json).await?;
        }
        Commands::Check => {
            cli::check::check(&state, cli.json).await?;
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
