//! Volley Orchestrator
//!
//! Accepts operation requests over HTTP and coordinates the jobs they
//! launch against remote hosts.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Context: Store, execution engine, task plugins and worker pool, built once
//! - Runners: One facade per operation, in-line or as a background job
//! - Services: Job listing, inspection, follow and deletion
//! - API: axum handlers mapping errors to status codes

mod api;
mod config;
mod context;
mod runner;
mod service;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::context::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "volley_orchestrator=info,volley_worker=info,volley_core=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Volley Orchestrator");

    let config = load_config()?;
    info!(
        "Loaded configuration: executor={}, max_parallel_jobs={}",
        config.worker.executor, config.worker.max_parallel_jobs
    );

    let (ctx, _dispatcher) = AppContext::bootstrap(config)?;
    let addr = ctx.config.bind_addr.clone();

    let app = api::create_router(ctx);

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
