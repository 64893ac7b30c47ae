//! Dispatches a parsed `Cli` to its handler: matches over `Commands` and
//! hands off to the matching module under `handlers`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Commands, LogLevel};
use crate::{context, handlers};

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.log_level);

    let (config, workspace) = context::load_config(cli.data_dir.as_deref())?;
    tracing::info!(target: "agmux::cli", workspace = %workspace.display(), "resolved workspace");

    match cli.command {
        Commands::Run(args) => handlers::run_mission::handle(args, &workspace, cli.format).await,
        Commands::Interactive(args) => handlers::interactive::handle(args, &config, &workspace).await,
        Commands::Status(args) => handlers::status::handle(args, &workspace, cli.format).await,
    }
}

fn init_tracing(level: LogLevel) {
    let directive = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("agmux={directive}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
