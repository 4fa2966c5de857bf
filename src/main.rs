//! Conductor CLI entry point.

use clap::Parser;

use conductor::cli::commands::{daemon, history, metrics, queue, schedule, workflow};
use conductor::cli::service::load_config;
use conductor::cli::{handle_error, Cli, Commands};
use conductor::infrastructure::logging::LoggerImpl;

/// Level for one-shot commands, so log lines do not bury their output.
const COMMAND_LOG_LEVEL: &str = "warn";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = run(cli).await {
        handle_error(err, json);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    let mut logging = config.logging.clone();
    if !matches!(cli.command, Commands::Start(_)) {
        logging.level = COMMAND_LOG_LEVEL.to_string();
        logging.log_dir = None;
    }
    let _logger = LoggerImpl::init(&logging)?;

    match cli.command {
        Commands::Start(args) => daemon::start(args, config, cli.config, cli.json).await,
        Commands::Stop(args) => daemon::stop(args, config, cli.json).await,
        Commands::Status => daemon::status(config, cli.json).await,
        Commands::Queue(args) => queue::execute(args, config, cli.json).await,
        Commands::Workflows => workflow::list(config, cli.json).await,
        Commands::Workflow(args) => workflow::execute(args, config, cli.json).await,
        Commands::Schedules => schedule::list(config, cli.json).await,
        Commands::Schedule(args) => schedule::execute(args, config, cli.json).await,
        Commands::Metrics => metrics::execute(config, cli.json).await,
        Commands::History(args) => history::execute(args, config, cli.json).await,
    }
}
