//! Unison CLI, the main entry point.
//!
//! Commands:
//! - `agent`    Run one agent on a task
//! - `clan`     Run a clan definition file
//! - `tools`    Print the built-in tool schemas as JSON
//! - `history`  Print an agent's persisted steps

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "unison",
    about = "Unison: coordinate LLM agents with typed tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single agent on a task
    Agent {
        /// The task to perform
        #[arg(short, long)]
        message: String,

        /// Identity the agent runs (and persists history) under
        #[arg(long, default_value = "assistant")]
        identity: String,

        /// Comma-separated tool names (default: all built-in tools)
        #[arg(long, value_delimiter = ',')]
        tools: Option<Vec<String>>,

        /// Also write the answer to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a clan from a TOML definition file
    Clan {
        /// Path to the clan definition
        file: PathBuf,
    },

    /// Print the built-in tool schemas as JSON
    Tools,

    /// Print the persisted steps of an agent
    History {
        identity: String,

        /// Delete the history instead of printing it
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent { message, identity, tools, output } => {
            commands::agent::run(&message, &identity, tools, output).await?
        }
        Commands::Clan { file } => commands::clan::run(&file).await?,
        Commands::Tools => commands::tools::run()?,
        Commands::History { identity, clear } => commands::history::run(&identity, clear).await?,
    }

    Ok(())
}
