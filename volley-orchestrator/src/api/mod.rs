//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod operation;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// Create the main API router with all endpoints
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Operation endpoints
        .route("/target", get(operation::get_target))
        .route("/ping", get(operation::get_ping).post(operation::post_ping))
        .route("/facter", get(operation::get_facter).post(operation::post_facter))
        .route("/service", get(operation::get_service).post(operation::post_service))
        .route("/execute", get(operation::get_execute).post(operation::post_execute))
        .route("/deploy", post(operation::post_deploy))
        .route("/task", get(operation::list_tasks).post(operation::post_task))
        // Job endpoints
        .route("/jobs", get(job::list_jobs))
        .route("/jobs/{jid}", get(job::get_job).delete(job::delete_job))
        // Add state and middleware
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
}
