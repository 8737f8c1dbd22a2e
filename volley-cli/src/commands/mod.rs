//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod operation;
mod task;

pub use job::JobCommands;
pub use operation::{DeployArgs, ExecuteArgs, HostsArgs, ServiceArgs};
pub use task::TaskCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List the hosts matching a glob pattern
    Target {
        /// Host pattern, all hosts when absent
        pattern: Option<String>,
    },
    /// Check that hosts are reachable
    Ping(HostsArgs),
    /// Collect host facts
    Facter(HostsArgs),
    /// Start, stop or restart a service
    Service(ServiceArgs),
    /// Run a raw shell command
    Execute(ExecuteArgs),
    /// Deploy a role
    Deploy(DeployArgs),
    /// Task plugins
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Target { pattern } => operation::list_targets(pattern, config).await,
        Commands::Ping(args) => operation::ping(args, config).await,
        Commands::Facter(args) => operation::facter(args, config).await,
        Commands::Service(args) => operation::service(args, config).await,
        Commands::Execute(args) => operation::execute(args, config).await,
        Commands::Deploy(args) => operation::deploy(args, config).await,
        Commands::Task { command } => task::handle_task_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
    }
}
