//! Steward CLI: offline tooling around the agent core.
//!
//! Commands:
//! - `init`: Write the default config to `~/.steward/config.toml`
//! - `config`: Print the effective configuration
//! - `validate`: Check a plan file and optionally print the corrected plan
//! - `canvas`: List, show or clean up recorded task canvases

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Steward: goal-driven agent tooling",
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
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },

    /// Check an execution plan against the static validation rules
    Validate {
        /// Plan JSON file (`{"steps": [...]}`)
        plan: PathBuf,

        /// The goal the plan is meant to achieve
        #[arg(short, long)]
        goal: String,

        /// Print the corrected plan
        #[arg(long)]
        fix: bool,
    },

    /// Inspect recorded task canvases
    Canvas {
        #[command(subcommand)]
        action: CanvasCommand,
    },
}

#[derive(Subcommand)]
enum CanvasCommand {
    /// List canvases, most recently updated first
    List,

    /// Show one canvas's progress
    Show {
        /// Canvas id (file name without `.json`)
        id: String,
    },

    /// Delete canvases not updated for a number of days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path()
            } else {
                commands::config_cmd::show()?
            }
        }
        Commands::Validate { plan, goal, fix } => commands::validate::run(&plan, &goal, fix)?,
        Commands::Canvas { action } => match action {
            CanvasCommand::List => commands::canvas::list()?,
            CanvasCommand::Show { id } => commands::canvas::show(&id)?,
            CanvasCommand::Cleanup { days } => commands::canvas::cleanup(days)?,
        },
    }

    Ok(())
}
