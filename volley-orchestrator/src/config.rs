//! Orchestrator configuration
//!
//! Loaded once at startup and shared read-only through the application
//! context.

use volley_worker::WorkerConfig;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Execution parameters of the in-process worker
    pub worker: WorkerConfig,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: String) -> Self {
        Self {
            bind_addr,
            worker: WorkerConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - VOLLEY_BIND_ADDR (default: 127.0.0.1:16808)
    /// - every variable read by [`WorkerConfig::from_env`]
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("VOLLEY_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:16808".to_string());

        Ok(Self {
            bind_addr,
            worker: WorkerConfig::from_env()?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        self.worker.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("127.0.0.1:16808".to_string())
    }
}
