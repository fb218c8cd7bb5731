//! Cortex CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write a default config
//! - `chat`: Interactive or single-message chat
//! - `serve`: Start the HTTP/WebSocket gateway
//! - `history`: List, show and delete saved chats
//! - `doctor`: Diagnose config, model runtime and tools

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cortex",
    about = "Cortex - local LLM chat assistant with tools",
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
    #[arg(long, global = true, env = "CORTEX_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Model to load (defaults to model.name from config)
        #[arg(long, env = "CORTEX_MODEL")]
        model: Option<String>,

        /// Start from a saved chat
        #[arg(short, long)]
        resume: Option<String>,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage saved chats
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Diagnose system health
    Doctor,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List saved chats
    List,

    /// Print a saved chat
    Show { name: String },

    /// Delete a saved chat
    Delete { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    // The server logs its lifecycle; interactive commands stay quiet.
    let filter = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Serve { .. }, false) => "info",
        _ => "warn",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            message,
            model,
            resume,
        } => commands::chat::run(message, model, resume, cli.verbose).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::History { action } => match action {
            HistoryAction::List => commands::history::list().await?,
            HistoryAction::Show { name } => commands::history::show(&name).await?,
            HistoryAction::Delete { name } => commands::history::delete(&name).await?,
        },
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
