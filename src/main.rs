use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use backend_plugin_host::commands;
use backend_plugin_host::config;
use backend_plugin_host::logging;

#[derive(Parser, Debug)]
#[command(name = "plugin-host")]
#[command(about = "Runs and supervises external backend plugins", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Start the configured plugins and run until interrupted (default)
    Run,
    /// Start each plugin, run its health check and stop it
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(ref path) => config::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => config::load_from_env_or_file()
            .await
            .context("Failed to load configuration")?,
    };

    logging::init(&config.logging, args.debug)?;
    match args.config {
        Some(ref path) => tracing::info!("Configuration loaded from {}", path.display()),
        None => tracing::info!("Configuration loaded from default locations"),
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Check => commands::run_plugin_check(config).await?,
        Command::Run => commands::run_host(config).await?,
    }
    Ok(())
}
