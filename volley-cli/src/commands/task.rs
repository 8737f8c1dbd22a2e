//! Task command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use volley_client::VolleyClient;
use volley_core::dto::operation::TaskRequest;

use crate::commands::operation::{parse_json_object, report_launch};
use crate::config::Config;

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// List the registered task plugins
    List,
    /// Launch a task plugin over hosts
    Run {
        /// Target hosts
        #[arg(required = true)]
        targets: Vec<String>,

        /// Task name, free text
        #[arg(short, long)]
        name: String,

        /// Plugin type (see `task list`)
        #[arg(short = 't', long = "type")]
        kind: String,

        /// Plugin options as a JSON object
        #[arg(short, long)]
        opts: Option<String>,

        /// Follow the job until it finishes
        #[arg(short, long)]
        follow: bool,
    },
}

/// Handle task commands
pub async fn handle_task_command(command: TaskCommands, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);

    match command {
        TaskCommands::List => list_tasks(&client).await,
        TaskCommands::Run {
            targets,
            name,
            kind,
            opts,
            follow,
        } => {
            let taskopts = opts.as_deref().map(parse_json_object).transpose()?;
            let launched = client
                .run_task(TaskRequest {
                    targets,
                    taskname: name,
                    tasktype: kind,
                    taskopts,
                })
                .await?;
            report_launch(&client, launched, follow).await
        }
    }
}

async fn list_tasks(client: &VolleyClient) -> Result<()> {
    let tasks = client.list_tasks().await?;

    if tasks.is_empty() {
        println!("{}", "No task plugins registered.".yellow());
    } else {
        for task in tasks {
            println!("  {} {} ({})", "▸".cyan(), task.kind.bold(), task.name);
        }
    }

    Ok(())
}
