//! ragchat CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Ask a question (single or interactive) grounded in local documents
//! - `config`  — Print the default configuration or validate the current one

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "ragchat — retrieval-augmented chat over your own documents",
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
    /// Ask questions about a document folder
    Ask {
        /// Ask a single question instead of entering interactive mode
        question: Option<String>,

        /// Conversation id to use instead of a random one. History is kept
        /// in memory, so it only carries across questions of one session
        #[arg(short, long)]
        conversation: Option<String>,

        /// Print the answer as it is generated
        #[arg(short, long)]
        stream: bool,

        /// Folder of .txt/.md files to answer from
        #[arg(short, long, default_value = ".")]
        docs: PathBuf,
    },

    /// Show or validate configuration
    Config {
        /// Validate ~/.ragchat/config.toml instead of printing the defaults
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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
        Commands::Ask {
            question,
            conversation,
            stream,
            docs,
        } => commands::ask::run(question, conversation, stream, docs).await?,
        Commands::Config { validate } => {
            if validate {
                commands::config_cmd::validate()?
            } else {
                commands::config_cmd::show()
            }
        }
    }

    Ok(())
}
