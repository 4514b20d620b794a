//! stockchat CLI: the main entry point.
//!
//! Commands:
//! - `init`: Create the config file and the stock database
//! - `chat`: Interactive chat or single-message mode
//! - `tools`: List the tools declared to the model
//! - `query`: Run the guarded SQL tool directly
//! - `status`: Show configuration and database status

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "stockchat",
    about = "stockchat - ask questions about a stock database in natural language",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.stockchat/config.toml)
    #[arg(short, long, global = true, env = "STOCKCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and database
    Init {
        /// Also load a small sample dataset
        #[arg(long)]
        sample_data: bool,
    },

    /// Chat with the stock assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Backend to use (openai, anthropic, ollama)
        #[arg(short, long)]
        provider: Option<String>,

        /// Override chat.max_turns
        #[arg(long)]
        max_turns: Option<u32>,

        /// Print the full run outcome as JSON (single-message mode)
        #[arg(long)]
        json: bool,
    },

    /// List the tools the model can call
    Tools,

    /// Run a read-only SQL query through the guard rail
    Query {
        /// A single SELECT statement
        sql: String,
    },

    /// Show configuration and database status
    Status {
        /// Also ping the selected backend
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
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

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { sample_data } => commands::init::run(config_path, sample_data).await?,
        Commands::Chat {
            message,
            provider,
            max_turns,
            json,
        } => return commands::chat::run(config_path, message, provider, max_turns, json).await,
        Commands::Tools => commands::tools::run(config_path).await?,
        Commands::Query { sql } => commands::query::run(config_path, &sql).await?,
        Commands::Status { check } => commands::status::run(config_path, check).await?,
    }

    Ok(ExitCode::SUCCESS)
}
