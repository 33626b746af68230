//! Limited KV backend interface.
//!
//! The bridge delegates storage to a backend that offers only two calls: an
//! unconditional range read and an atomic compare-and-branch transaction.
//! Revision assignment, durability and the serializability of `txn` are the
//! backend's responsibility.
//!
//! Range results use the backend's own [`KeyValue`] record; transactions speak
//! the wire Txn messages directly.

use crate::adapters::etcd::proto::{RangeRequest, ResponseHeader, TxnRequest, TxnResponse};
use crate::adapters::RequestContext;
use crate::core::error::BackendResult;
use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryBackend;

/// A key-value record as the backend stores it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Attached lease ID, 0 for none.
    pub lease: i64,
    /// Revision at which the key was first created.
    pub create_revision: i64,
    /// Revision of the last modification.
    pub mod_revision: i64,
}

/// Result of a backend range read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendRangeResponse {
    pub header: Option<ResponseHeader>,
    pub kvs: Vec<KeyValue>,
    /// Result was truncated by the request limit.
    pub more: bool,
    /// Total number of matching keys.
    pub count: i64,
}

/// The storage interface the bridge is built on.
///
/// Implementations must make `txn` atomic and serializable across concurrent
/// callers: the bridge's put path relies on the compare being evaluated and the
/// chosen branch applied without any interleaving writer.
#[async_trait]
pub trait LimitedBackend: Send + Sync {
    /// Read a key or a key range without conditions.
    async fn range(
        &self,
        ctx: &RequestContext,
        req: RangeRequest,
    ) -> BackendResult<BackendRangeResponse>;

    /// Evaluate the compares and run exactly one branch atomically.
    async fn txn(&self, ctx: &RequestContext, req: TxnRequest) -> BackendResult<TxnResponse>;
}

#[async_trait]
impl<B: LimitedBackend + ?Sized> LimitedBackend for std::sync::Arc<B> {
    async fn range(
        &self,
        ctx: &RequestContext,
        req: RangeRequest,
    ) -> BackendResult<BackendRangeResponse> {
        (**self).range(ctx, req).await
    }

    async fn txn(&self, ctx: &RequestContext, req: TxnRequest) -> BackendResult<TxnResponse> {
        (**self).txn(ctx, req).await
    }
}
