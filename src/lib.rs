//! kvbridge - etcd v3 KV endpoint over a limited transactional backend.
//!
//! Clients speak the etcd v3 KV protocol. The storage behind the endpoint only
//! offers unconditional range reads and atomic compare-and-branch
//! transactions, so the bridge validates, rewrites or refuses each request to
//! fit that surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    etcd v3 gRPC (etcdserverpb.KV)               │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           KvBridge                              │
//! │      validate Range │ Put as CAS Txn │ refuse DeleteRange       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        LimitedBackend                           │
//! │                     Range │ compare-and-branch Txn              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Runtime orchestration
//! - [`core::error`] - Error types
//! - [`adapters::etcd`] - etcd v3 KV bridge, wire messages and gRPC server
//! - [`backend`] - The limited backend trait and an in-memory implementation
//! - [`cli::commands`] - CLI command implementations

// Core infrastructure
pub mod core;

// Protocol adapters
pub mod adapters;

// Storage backends
pub mod backend;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use adapters::etcd;
