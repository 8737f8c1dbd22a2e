//! Worker configuration
//!
//! Defines the execution parameters shared by every job a worker runs:
//! which engine to use, how wide to fan out, how long to wait on hosts.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration
///
/// Built once at process start and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name of the execution engine (e.g. "shell")
    pub executor: String,

    /// Maximum number of hosts an engine talks to at once
    pub concurrency: usize,

    /// Bound on each remote call, `None` for no limit
    pub timeout: Option<Duration>,

    /// Maximum number of jobs running at the same time
    pub max_parallel_jobs: usize,

    /// Host inventory file; without one every target is taken literally
    pub inventory: Option<PathBuf>,

    /// Directory holding `<role>.role` deploy definitions
    pub roles_dir: PathBuf,

    /// Remote user for ssh, defaults to the ssh configuration
    pub ssh_user: Option<String>,

    /// ssh connection timeout in seconds
    pub ssh_connect_timeout: u64,

    /// How long a worker waits for a job to be associated before running it
    pub association_timeout: Duration,
}

impl WorkerConfig {
    /// Creates a new configuration with defaults
    pub fn new(executor: String) -> Self {
        Self {
            executor,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout: None,
            max_parallel_jobs: 4,
            inventory: None,
            roles_dir: PathBuf::from("./roles"),
            ssh_user: None,
            ssh_connect_timeout: 10,
            association_timeout: Duration::from_secs(10),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - VOLLEY_EXECUTOR (default: shell)
    /// - VOLLEY_CONCURRENCY (default: available parallelism)
    /// - VOLLEY_TIMEOUT (seconds, 0 = none, default: 0)
    /// - VOLLEY_MAX_PARALLEL_JOBS (default: 4)
    /// - VOLLEY_INVENTORY (path)
    /// - VOLLEY_ROLES_DIR (default: ./roles)
    /// - VOLLEY_SSH_USER
    /// - VOLLEY_SSH_CONNECT_TIMEOUT (seconds, default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new(
            std::env::var("VOLLEY_EXECUTOR").unwrap_or_else(|_| "shell".to_string()),
        );

        let concurrency = parse_env("VOLLEY_CONCURRENCY")?.unwrap_or(defaults.concurrency);

        let timeout = parse_env::<u64>("VOLLEY_TIMEOUT")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let max_parallel_jobs =
            parse_env("VOLLEY_MAX_PARALLEL_JOBS")?.unwrap_or(defaults.max_parallel_jobs);

        let inventory = std::env::var("VOLLEY_INVENTORY").ok().map(PathBuf::from);

        let roles_dir = std::env::var("VOLLEY_ROLES_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.roles_dir);

        let ssh_user = std::env::var("VOLLEY_SSH_USER")
            .ok()
            .filter(|user| !user.is_empty());

        let ssh_connect_timeout =
            parse_env("VOLLEY_SSH_CONNECT_TIMEOUT")?.unwrap_or(defaults.ssh_connect_timeout);

        Ok(Self {
            executor: defaults.executor,
            concurrency,
            timeout,
            max_parallel_jobs,
            inventory,
            roles_dir,
            ssh_user,
            ssh_connect_timeout,
            association_timeout: defaults.association_timeout,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executor.is_empty() {
            anyhow::bail!("executor cannot be empty");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.ssh_connect_timeout == 0 {
            anyhow::bail!("ssh_connect_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("shell".to_string())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.executor, "shell");
        assert_eq!(config.max_parallel_jobs, 4);
        assert_eq!(config.ssh_connect_timeout, 10);
        assert!(config.timeout.is_none());
        assert!(config.concurrency > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = WorkerConfig::default();

        config.concurrency = 0;
        assert!(config.validate().is_err());

        config.concurrency = 2;
        config.max_parallel_jobs = 0;
        assert!(config.validate().is_err());

        config.max_parallel_jobs = 1;
        config.executor = String::new();
        assert!(config.validate().is_err());

        config.executor = "shell".to_string();
        assert!(config.validate().is_ok());
    }
}
