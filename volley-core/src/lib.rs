//! Volley Core
//!
//! Core types and abstractions for the Volley job coordination system.
//!
//! This crate contains:
//! - Domain types: Jobs, result records, coordination key formatting
//! - DTOs: Request/response bodies and the background work unit
//! - Store: The coordination store contract and an in-memory implementation
//! - Repository: Store-backed job lifecycle (create, associate, finalize, follow, sweep)
//! - Submit: The background execution substrate contract

pub mod domain;
pub mod dto;
pub mod error;
pub mod repository;
pub mod store;
pub mod submit;

pub use error::{Error, ErrorKind, Result};
