//! Volley CLI
//!
//! Command-line interface for interacting with the Volley orchestrator.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "volley")]
#[command(about = "Volley remote operations CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(long, env = "VOLLEY_URL", default_value = "http://127.0.0.1:16808")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.url,
    };

    handle_command(cli.command, &config).await
}
