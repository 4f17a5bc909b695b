//! Scribeloop CLI — the main entry point.
//!
//! Commands:
//! - `write`   — Research a topic and print the assembled article
//! - `tools`   — List the registered capabilities
//! - `config`  — Print, locate or validate the configuration
//! - `status`  — Show the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::write::WriteArgs;

#[derive(Parser)]
#[command(
    name = "scribeloop",
    about = "Scribeloop — agentic research-and-writing orchestrator",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Use this config file instead of ~/.scribeloop/config.toml
    #[arg(short, long, global = true, env = "SCRIBELOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a topic and write an article
    Write(WriteArgs),

    /// List registered capabilities
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the effective configuration
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as TOML
    Default,
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
    /// Check the configuration for errors
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let loaded = commands::load_config(cli.config.as_deref())?;
    let config = loaded.config.clone();

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    loaded.log_source();

    match cli.command {
        Commands::Write(args) => commands::write::run(&config, args).await?,
        Commands::Tools => commands::tools::run(&config).await?,
        Commands::Config { action } => match action {
            ConfigAction::Default => commands::config_cmd::default().await?,
            ConfigAction::Show => commands::config_cmd::show(&config).await?,
            ConfigAction::Path => commands::config_cmd::path(cli.config.as_deref()).await?,
            ConfigAction::Validate => commands::config_cmd::validate(&config).await?,
        },
        Commands::Status => commands::status::run(&config, cli.config.as_deref()).await?,
    }

    Ok(())
}
