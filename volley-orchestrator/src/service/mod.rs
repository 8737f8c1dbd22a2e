//! Service Module
//!
//! Business logic layer for the orchestrator that is not tied to one
//! operation.

pub mod job;

// Re-export for convenience
pub use job as job_service;
