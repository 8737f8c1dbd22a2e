//! Operation command handlers
//!
//! A single target without `--async` runs in-line and prints the host's
//! record. Anything else launches a background job and prints its jid,
//! following it with `--follow`.

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use colored::*;
use serde_json::Value as JsonValue;

use volley_client::{HostResult, LaunchResponse, VolleyClient};
use volley_core::dto::operation::{DeployRequest, ExecuteRequest, ServiceRequest};

use crate::commands::job::{follow_job, print_record};
use crate::config::Config;

/// How a launched job is reported
#[derive(Args)]
pub struct LaunchArgs {
    /// Launch a background job even for a single target
    #[arg(long = "async")]
    pub run_async: bool,

    /// Follow the background job until it finishes
    #[arg(short, long)]
    pub follow: bool,
}

/// Arguments of `ping` and `facter`
#[derive(Args)]
pub struct HostsArgs {
    /// Target hosts
    #[arg(required = true)]
    pub targets: Vec<String>,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

/// Service state to reach
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServiceAction {
    Started,
    Stopped,
    Restarted,
}

impl ServiceAction {
    fn code(self) -> i64 {
        match self {
            ServiceAction::Started => 0,
            ServiceAction::Stopped => 1,
            ServiceAction::Restarted => 2,
        }
    }
}

/// Arguments of `service`
#[derive(Args)]
pub struct ServiceArgs {
    /// Target hosts
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Service name
    #[arg(short, long)]
    pub name: String,

    /// State to reach
    #[arg(short, long, value_enum)]
    pub state: ServiceAction,

    /// Reload instead of restarting where the service allows it
    #[arg(long)]
    pub graceful: bool,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

/// Arguments of `execute`
#[derive(Args)]
pub struct ExecuteArgs {
    /// Target hosts
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Shell command to run
    #[arg(short, long)]
    pub cmd: String,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

/// Arguments of `deploy`, always a background job
#[derive(Args)]
pub struct DeployArgs {
    /// Target hosts
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Role to deploy
    #[arg(short, long)]
    pub role: String,

    /// Extra variables as a JSON object
    #[arg(short, long)]
    pub extra_vars: Option<String>,

    /// Only run these steps (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub partial: Vec<String>,

    /// Follow the job until it finishes
    #[arg(short, long)]
    pub follow: bool,
}

/// Where an operation runs
#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Inline,
    Background { follow: bool },
}

fn mode(targets: &[String], launch: &LaunchArgs) -> Result<Mode> {
    if launch.run_async || launch.follow {
        return Ok(Mode::Background {
            follow: launch.follow,
        });
    }
    if targets.len() != 1 {
        bail!(
            "in-line runs take exactly one target, pass --async to launch a job over {} targets",
            targets.len()
        );
    }
    Ok(Mode::Inline)
}

/// List matching hosts
pub async fn list_targets(pattern: Option<String>, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);
    let hosts = client.target(pattern.as_deref()).await?;

    if hosts.is_empty() {
        println!("{}", "No hosts match.".yellow());
    } else {
        for host in hosts {
            println!("{}", host);
        }
    }

    Ok(())
}

pub async fn ping(args: HostsArgs, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);

    match mode(&args.targets, &args.launch)? {
        Mode::Inline => print_host_result(client.ping(&args.targets[0]).await?),
        Mode::Background { follow } => {
            let launched = client.ping_async(args.targets).await?;
            report_launch(&client, launched, follow).await
        }
    }
}

pub async fn facter(args: HostsArgs, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);

    match mode(&args.targets, &args.launch)? {
        Mode::Inline => print_host_result(client.facter(&args.targets[0]).await?),
        Mode::Background { follow } => {
            let launched = client.facter_async(args.targets).await?;
            report_launch(&client, launched, follow).await
        }
    }
}

pub async fn service(args: ServiceArgs, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);
    let state = args.state.code();

    match mode(&args.targets, &args.launch)? {
        Mode::Inline => {
            let result = client
                .service(&args.targets[0], &args.name, state, args.graceful)
                .await?;
            print_host_result(result)
        }
        Mode::Background { follow } => {
            let launched = client
                .service_async(ServiceRequest {
                    targets: args.targets,
                    name: Some(args.name),
                    state: Some(state),
                    graceful: args.graceful,
                })
                .await?;
            report_launch(&client, launched, follow).await
        }
    }
}

pub async fn execute(args: ExecuteArgs, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);

    match mode(&args.targets, &args.launch)? {
        Mode::Inline => print_host_result(client.execute(&args.targets[0], &args.cmd).await?),
        Mode::Background { follow } => {
            let launched = client
                .execute_async(ExecuteRequest {
                    targets: args.targets,
                    cmd: Some(args.cmd),
                })
                .await?;
            report_launch(&client, launched, follow).await
        }
    }
}

pub async fn deploy(args: DeployArgs, config: &Config) -> Result<()> {
    let client = VolleyClient::new(&config.orchestrator_url);

    let extra_vars = args.extra_vars.as_deref().map(parse_json_object).transpose()?;
    let partial = (!args.partial.is_empty()).then(|| JsonValue::from(args.partial));

    let launched = client
        .deploy(DeployRequest {
            targets: args.targets,
            role: args.role,
            extra_vars,
            partial,
        })
        .await?;
    report_launch(&client, launched, args.follow).await
}

/// Parses a command line JSON object argument
pub(crate) fn parse_json_object(text: &str) -> Result<JsonValue> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("Invalid JSON argument: {}", e))?;
    if !value.is_object() {
        bail!("Expected a JSON object, got: {}", text);
    }
    Ok(value)
}

fn print_host_result(result: HostResult) -> Result<()> {
    for (host, record) in &result {
        print_record(host, record);
    }
    Ok(())
}

/// Prints the jid of a launched job and follows it if asked to
pub(crate) async fn report_launch(
    client: &VolleyClient,
    launched: LaunchResponse,
    follow: bool,
) -> Result<()> {
    println!("{} Launched job {}", "✓".green(), launched.jid.cyan());

    if follow {
        println!();
        follow_job(client, &launched.jid, false).await?;
    }

    Ok(())
}
