//! etcd v3 KV adapter.
//!
//! Exposes the `etcdserverpb.KV` surface on top of a backend that only offers
//! range reads and compare-and-branch transactions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      etcd v3 gRPC (KV)                      │
//! │     Range │ Put │ DeleteRange │ Txn │ Compact               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         KvBridge                            │
//! │  - Range option validation                                  │
//! │  - Put as observe + compare-and-swap txn                    │
//! │  - Delete refusal, Compact acknowledgement                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     LimitedBackend                          │
//! │                  Range │ Txn (compare/branch)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`bridge`] - The KV method set and its bridge implementation
//! - [`kv`] - Range validation and record translation
//! - [`txn`] - Compare evaluation and txn helpers
//! - [`proto`] - Wire messages
//! - [`errors`] - Error mapping to gRPC status codes

pub mod bridge;
pub mod errors;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod kv;
pub mod proto;
pub mod txn;

// Re-export commonly used types
pub use bridge::{KvBridge, KvServer};
pub use errors::{to_etcd_error, EtcdError, GrpcCode};
#[cfg(feature = "grpc")]
pub use grpc::{EtcdGrpcServer, EtcdKvServer};
pub use kv::{to_kv, to_kvs, validate_range};
pub use proto::{
    CompactionRequest, CompactionResponse, Compare, DeleteRangeRequest, DeleteRangeResponse,
    KeyValue, PutRequest, PutResponse, RangeRequest, RangeResponse, RequestOp, ResponseHeader,
    ResponseOp, TxnRequest, TxnResponse,
};
pub use txn::{TxnLimits, TxnValidationError};
