//! Fleetline CLI entry point.

use clap::Parser;

use fleetline::cli::{self, Cli, Commands, Runtime};
use fleetline::infrastructure::config::ConfigLoader;
use fleetline::infrastructure::logging::{LogConfig, LoggerImpl};

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;
    tracing::debug!(in_memory = cli.in_memory, "configuration loaded");

    let runtime = Runtime::build(config, cli.in_memory).await?;

    match cli.command {
        Commands::Consume(args) => cli::commands::consume::execute(args, runtime, cli.json).await,
        Commands::Reconcile(args) => cli::commands::reconcile::execute(args, runtime, cli.json).await,
        Commands::Agent(args) => cli::commands::agent::execute(args, runtime, cli.json).await,
        Commands::Dlq(args) => cli::commands::dlq::execute(args, runtime, cli.json).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        cli::handle_error(err, json);
    }
}
