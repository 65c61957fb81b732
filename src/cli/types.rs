//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::agent::AgentArgs;
use crate::cli::commands::consume::ConsumeArgs;
use crate::cli::commands::dlq::DlqArgs;
use crate::cli::commands::reconcile::ReconcileArgs;

#[derive(Parser, Debug)]
#[command(name = "fleetline")]
#[command(about = "Fleetline - fleet telemetry consumer and execution reconciler", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file; replaces .fleetline/config.yaml and local.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use process-local storage instead of SQLite and Redis
    #[arg(long, global = true)]
    pub in_memory: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume agent telemetry streams until Ctrl-C
    Consume(ConsumeArgs),

    /// Detect and resolve execution drift
    Reconcile(ReconcileArgs),

    /// Agent liveness and remote control
    Agent(AgentArgs),

    /// Inspect and replay dead-lettered messages
    Dlq(DlqArgs),
}
