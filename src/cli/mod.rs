use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod ask;
pub mod chat;
pub mod models;

use crate::core::AppConfig;

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session
    Chat {
        /// Model to use, see `models` for the options
        #[arg(long)]
        model: Option<String>,

        /// Wait for the whole reply instead of streaming it
        #[arg(long, action, default_value = "false")]
        no_stream: bool,
    },
    /// Ask a single question and print the reply
    Ask {
        /// Model to use, see `models` for the options
        #[arg(long)]
        model: Option<String>,

        prompt: String,
    },
    /// List the models that can be selected
    Models {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

// Logs go to stderr so they never interleave with a reply being
// streamed to stdout.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=warn", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    // Handle each sub command
    match args.command {
        Some(Command::Chat { model, no_stream }) => {
            let config = AppConfig::from_env()?;
            chat::run(config, model, !no_stream).await?;
        }
        Some(Command::Ask { model, prompt }) => {
            let config = AppConfig::from_env()?;
            ask::run(config, model, &prompt).await?;
        }
        Some(Command::Models {}) => {
            models::run();
        }
        None => {
            let config = AppConfig::from_env()?;
            chat::run(config, None, true).await?;
        }
    }

    Ok(())
}
