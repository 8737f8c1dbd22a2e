//! Core domain types
//!
//! This module contains the core domain structures used across Volley services.
//! They are shared between the orchestrator (which creates and queries jobs)
//! and the worker (which drives jobs to completion).

pub mod job;
pub mod keys;
pub mod result;
