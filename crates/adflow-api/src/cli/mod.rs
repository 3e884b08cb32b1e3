//! CLI command definitions for the `adflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod check;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Orchestrate ad-platform workflows with checkpoints and rollback.
#[derive(Parser)]
#[command(name = "adflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a workflow request from a JSON file and wait for its result.
    ///
    /// A missing `request_id` is filled in with a fresh UUID. Ctrl-C cancels
    /// the workflow and rolls back what it created.
    Submit {
        /// Path to the request JSON file.
        file: PathBuf,

        /// Plan and validate only; nothing is created or stored.
        #[arg(long)]
        dry_run: bool,
    },

    /// Resume an interrupted workflow from its last checkpoint.
    Resume {
        /// Request id of the workflow.
        request_id: String,
    },

    /// Show the checkpointed state of a workflow.
    Status {
        /// Request id of the workflow.
        request_id: String,
    },

    /// Remove stored state: one finished workflow, or everything past its
    /// retention window.
    Purge {
        /// Request id to purge (omit to purge expired records).
        request_id: Option<String>,

        /// Also forget every cached asset handle, expired or not.
        #[arg(long)]
        assets: bool,
    },

    /// Resume every workflow left running by a previous process.
    Recover,

    /// Verify the access token and list the ad accounts it can reach.
    Check,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
