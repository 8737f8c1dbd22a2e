//! Scheduler layer for the worker
//!
//! Accepts work units from the request-handling side and runs them in the
//! background, a bounded number at a time.

pub mod pool;

pub use pool::WorkerPool;
