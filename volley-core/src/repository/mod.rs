//! Repository Module
//!
//! Store-backed job lifecycle. Every function takes the coordination store
//! explicitly; none of them keeps state between calls.

pub mod follow;
pub mod job;

// Re-export for convenience
pub use follow::JobFollower;
pub use job as job_repository;
