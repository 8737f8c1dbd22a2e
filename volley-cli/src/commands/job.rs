//! Job command handlers
//!
//! Handles all job-related CLI commands including listing,
//! viewing details, following and deleting.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use futures::StreamExt;

use volley_client::{FollowEvent, VolleyClient};
use volley_core::domain::job::{JobContext, JobState};
use volley_core::domain::result::{ExecStatus, ResultRecord};

use crate::config::Config;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List all jobs
    List {
        /// Show each job's context instead of its id only
        #[arg(short, long)]
        detail: bool,
    },
    /// Get job details
    Get {
        /// Job id
        jid: String,

        /// Include per-host results
        #[arg(short, long)]
        outputs: bool,

        /// Stream results until the job finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Delete a finished job
    Delete {
        /// Job id
        jid: String,
    },
}

/// Handle job commands
///
/// # Arguments
/// * `command` - The job command to execute
/// * `config` - The CLI configuration
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);

    match command {
        JobCommands::List { detail } => list_jobs(&client, detail).await,
        JobCommands::Get {
            jid,
            outputs,
            follow: true,
        } => follow_job(&client, &jid, outputs).await,
        JobCommands::Get { jid, outputs, .. } => get_job(&client, &jid, outputs).await,
        JobCommands::Delete { jid } => delete_job(&client, &jid).await,
    }
}

/// List all jobs
async fn list_jobs(client: &VolleyClient, detail: bool) -> Result<()> {
    if !detail {
        let ids = client.list_jobs().await?;
        if ids.is_empty() {
            println!("{}", "No jobs found.".yellow());
        }
        for id in ids {
            println!("{}", id);
        }
        return Ok(());
    }

    let jobs = client.list_jobs_detailed().await?;
    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in &jobs {
            print_job_summary(job);
        }
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &VolleyClient, jid: &str, outputs: bool) -> Result<()> {
    let job = client.get_job(jid, outputs).await?;
    print_job_details(&job);

    Ok(())
}

async fn delete_job(client: &VolleyClient, jid: &str) -> Result<()> {
    client.delete_job(jid).await?;
    println!("{} Deleted job {}", "✓".green(), jid.cyan());

    Ok(())
}

/// Streams a job's results until it finishes, then prints its final state
pub(crate) async fn follow_job(client: &VolleyClient, jid: &str, outputs: bool) -> Result<()> {
    let mut events = client.follow_job(jid, outputs).await?;

    while let Some(event) = events.next().await {
        match event? {
            FollowEvent::Snapshot(job) => {
                println!(
                    "{} {} on {}",
                    "Following".bold(),
                    job.operate.cyan(),
                    job.targets.join(", ")
                );
                for (host, records) in &job.return_data {
                    for record in records {
                        print_record(host, record);
                    }
                }
            }
            FollowEvent::Update(update) => {
                for (host, record) in &update {
                    print_record(host, record);
                }
            }
        }
    }

    let job = client.get_job(jid, false).await?;
    println!();
    println!("Job {} {}", jid.dimmed(), colorize_state(job.state));
    if !job.error.is_empty() {
        println!("{}", job.error.red());
    }

    Ok(())
}

/// Print a job summary
fn print_job_summary(job: &JobContext) {
    println!(
        "  {} Job {}",
        "▸".cyan(),
        job.taskid.as_deref().unwrap_or("-").dimmed()
    );
    println!("    Operation: {}", job.operate);
    println!("    State:     {}", colorize_state(job.state));
    println!("    Started:   {}", format_startat(job.startat).dimmed());
    println!("    Targets:   {}", job.targets.join(", "));
    println!();
}

/// Print detailed job information
fn print_job_details(job: &JobContext) {
    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.taskid.as_deref().unwrap_or("-").cyan());
    println!("  Operation: {}", job.operate);
    println!("  State:     {}", colorize_state(job.state));
    println!("  Started:   {}", format_startat(job.startat));
    println!("  Targets:   {}", job.targets.join(", "));

    if !job.operate_args.is_empty() {
        println!("\n{}", "Arguments:".bold());
        for (key, value) in &job.operate_args {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if !job.error.is_empty() {
        println!("\n{}", "Error:".bold());
        println!("{}", job.error.red());
    }

    if !job.return_data.is_empty() {
        println!("\n{}", "Results:".bold());
        for (host, records) in &job.return_data {
            for record in records {
                print_record(host, record);
            }
        }
    }
}

/// Print one host's result record on a line
pub(crate) fn print_record(host: &str, record: &ResultRecord) {
    let step = record
        .name
        .as_deref()
        .map(|name| format!(" [{}]", name))
        .unwrap_or_default();
    let payload = match &record.payload {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };

    println!(
        "{}{} {} {}",
        host.bold(),
        step.dimmed(),
        colorize_status(record.status),
        payload
    );
}

fn format_startat(startat: i64) -> String {
    chrono::DateTime::from_timestamp(startat, 0)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| startat.to_string())
}

/// Colorize a record status for display
fn colorize_status(status: ExecStatus) -> ColoredString {
    let name = status.name();
    match status {
        ExecStatus::Ok | ExecStatus::Changed => name.green(),
        ExecStatus::Skipped | ExecStatus::Announce => name.dimmed(),
        ExecStatus::Failed | ExecStatus::Unreachable | ExecStatus::NoMatch => name.red(),
    }
}

/// Colorize job state for display
fn colorize_state(state: JobState) -> ColoredString {
    let text = state.to_string();
    match state {
        JobState::Done => text.green(),
        JobState::Running => text.cyan(),
        JobState::Failed => text.red(),
    }
}
