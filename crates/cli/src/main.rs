//! DeepCritic CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Research a question until the critic accepts the answer
//! - `config`  — Show the effective configuration or its path
//! - `tools`   — List the tools the agent would be given

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(
    name = "deepcritic",
    about = "DeepCritic — a research agent that critiques its own answers",
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
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with the generate → search → critique loop
    Ask {
        /// The question to research
        query: String,

        /// Print every event as a JSON line while the run progresses
        #[arg(short, long)]
        stream: bool,

        /// Override the iteration cap from the config file
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },

    /// List the tools the agent can call
    Tools,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Local overrides first; dotenv never replaces a variable that is already set.
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for answers and events
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Ask {
            query,
            stream,
            max_iterations,
        } => {
            // The failure was already explained; only the exit status is left
            if !commands::ask::run(&query, stream, max_iterations).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path().await?
            } else {
                commands::config_cmd::show().await?
            }
        }
        Commands::Tools => commands::tools::run().await?,
    }

    Ok(ExitCode::SUCCESS)
}
