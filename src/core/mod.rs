//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Runtime orchestration
//! - [`error`] - Error types shared by the bridge and backends

pub mod config;
pub mod error;
pub mod runtime;
