//! parley CLI, the main entry point.
//!
//! Commands:
//! - `serve`          Start the HTTP gateway
//! - `ask`            Run one operation from the terminal
//! - `conversations`  List a user's stored conversations
//! - `config`         Show the effective configuration or a starter file
//! - `doctor`         Diagnose configuration and upstream health

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "parley: conversational AI orchestration with per-user limits",
    version
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
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single operation and print the answer
    Ask(commands::ask::AskArgs),

    /// List stored conversations
    Conversations {
        /// Whose conversations to list
        #[arg(short, long, env = "PARLEY_USER", default_value = "local")]
        user: String,

        /// Only conversations with this status (active, archived)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show configuration
    Config {
        /// Print a commented starter file instead of the effective config
        #[arg(long)]
        default: bool,
    },

    /// Diagnose configuration and upstream health
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask(args) => commands::ask::run(args).await?,
        Commands::Conversations { user, status } => commands::conversations::run(user, status).await?,
        Commands::Config { default } => commands::config_cmd::run(default)?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
