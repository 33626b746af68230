//! etcd KV service over a limited backend.
//!
//! [`KvBridge`] serves the `etcdserverpb.KV` method set on top of a
//! [`LimitedBackend`] that only offers unconditional range reads and atomic
//! compare-and-branch transactions.
//!
//! # Put
//!
//! etcd clients expect a put to be last-writer-wins without silently losing a
//! concurrent update. The backend has no single-key put, so each put is two
//! phases:
//!
//! 1. observe: range the key and take its mod revision (0 when absent)
//! 2. commit: run a Txn whose only compare is `mod_revision(key) == observed`,
//!    with the put in the success branch and a range of the key in the failure
//!    branch
//!
//! If the compare fails another writer got in between. The bridge reports
//! [`BridgeError::PutConflict`] and does not retry.
//!
//! # Unsupported surface
//!
//! - Range options the backend cannot honour fail with `"<field> is unsupported"`.
//! - DeleteRange always fails with `"delete is not supported"`.
//! - Compact is acknowledged without reclaiming anything.

use super::kv::{to_kvs, validate_range};
use super::proto::{
    CompactionRequest, CompactionResponse, Compare, DeleteRangeRequest, DeleteRangeResponse,
    PutRequest, PutResponse, RangeRequest, RangeResponse, RequestOp, ResponseHeader, TxnRequest,
    TxnResponse,
};
use crate::adapters::RequestContext;
use crate::backend::LimitedBackend;
use crate::core::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use tracing::Span;

/// The etcd KV RPC method set.
#[async_trait]
pub trait KvServer: Send + Sync {
    /// Read a key or a key range.
    async fn range(&self, ctx: RequestContext, req: RangeRequest) -> BridgeResult<RangeResponse>;

    /// Write a single key.
    async fn put(&self, ctx: RequestContext, req: PutRequest) -> BridgeResult<PutResponse>;

    /// Delete a key or a key range.
    async fn delete_range(
        &self,
        ctx: RequestContext,
        req: DeleteRangeRequest,
    ) -> BridgeResult<DeleteRangeResponse>;

    /// Run a compare-and-branch transaction.
    async fn txn(&self, ctx: RequestContext, req: TxnRequest) -> BridgeResult<TxnResponse>;

    /// Compact the revision history.
    async fn compact(
        &self,
        ctx: RequestContext,
        req: CompactionRequest,
    ) -> BridgeResult<CompactionResponse>;
}

/// KV service bridging etcd semantics onto a limited backend.
///
/// Holds no mutable state; all concurrency control is left to the backend's
/// transaction. Diagnostics are emitted under the span given at construction.
pub struct KvBridge<B> {
    backend: B,
    span: Span,
}

impl<B: LimitedBackend> KvBridge<B> {
    /// Create a bridge logging under a default `kv_bridge` span.
    pub fn new(backend: B) -> Self {
        Self::with_span(backend, tracing::info_span!("kv_bridge"))
    }

    /// Create a bridge that emits its diagnostics under `span`.
    pub fn with_span(backend: B, span: Span) -> Self {
        Self { backend, span }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read the mod revision currently stored for `key`, 0 if it is absent.
    async fn observe_mod_revision(&self, ctx: &RequestContext, key: &[u8]) -> BridgeResult<i64> {
        let resp = self
            .backend
            .range(ctx, RangeRequest::key(key))
            .await
            .map_err(|e| {
                tracing::error!(
                    parent: &self.span,
                    key = %String::from_utf8_lossy(key),
                    error = %e,
                    "error while reading revision for put"
                );
                e
            })?;
        Ok(resp.kvs.first().map_or(0, |kv| kv.mod_revision))
    }

    /// Commit `req` only if `key` still sits at `observed`.
    async fn commit_put(
        &self,
        ctx: &RequestContext,
        req: PutRequest,
        observed: i64,
    ) -> BridgeResult<PutResponse> {
        let key = req.key.clone();
        let txn = TxnRequest {
            compare: vec![Compare::mod_revision_equals(key.clone(), observed)],
            success: vec![RequestOp::put(req)],
            failure: vec![RequestOp::range(RangeRequest::key(key.clone()))],
        };

        let resp = self.backend.txn(ctx, txn).await.map_err(|e| {
            tracing::error!(
                parent: &self.span,
                key = %String::from_utf8_lossy(&key),
                error = %e,
                "error in put txn"
            );
            e
        })?;

        if !resp.succeeded {
            let current_revision = resp
                .responses
                .first()
                .and_then(|op| op.as_range())
                .and_then(|range| range.kvs.first())
                .map_or(0, |kv| kv.mod_revision);
            tracing::debug!(
                parent: &self.span,
                key = %String::from_utf8_lossy(&key),
                observed,
                current_revision,
                "put lost race to a concurrent writer"
            );
            return Err(BridgeError::PutConflict {
                key: String::from_utf8_lossy(&key).into_owned(),
                observed_revision: observed,
                current_revision,
            });
        }

        let first = resp.responses.into_iter().next().ok_or_else(|| {
            BridgeError::internal_consistency("put txn succeeded with no operation results")
        })?;
        first.into_put().ok_or_else(|| {
            BridgeError::internal_consistency("put txn succeeded without a put response")
        })
    }
}

#[async_trait]
impl<B: LimitedBackend> KvServer for KvBridge<B> {
    async fn range(&self, ctx: RequestContext, req: RangeRequest) -> BridgeResult<RangeResponse> {
        validate_range(&req)?;

        let key = String::from_utf8_lossy(&req.key).into_owned();
        let range_end = String::from_utf8_lossy(&req.range_end).into_owned();
        let resp = self.backend.range(&ctx, req).await.map_err(|e| {
            tracing::error!(
                parent: &self.span,
                %key,
                %range_end,
                error = %e,
                "error while range"
            );
            e
        })?;

        Ok(RangeResponse {
            header: resp.header,
            kvs: to_kvs(resp.kvs),
            more: resp.more,
            count: resp.count,
        })
    }

    async fn put(&self, ctx: RequestContext, req: PutRequest) -> BridgeResult<PutResponse> {
        let observed = self.observe_mod_revision(&ctx, &req.key).await?;
        self.commit_put(&ctx, req, observed).await
    }

    async fn delete_range(
        &self,
        _ctx: RequestContext,
        _req: DeleteRangeRequest,
    ) -> BridgeResult<DeleteRangeResponse> {
        Err(BridgeError::DeleteUnsupported)
    }

    async fn txn(&self, ctx: RequestContext, req: TxnRequest) -> BridgeResult<TxnResponse> {
        self.backend.txn(&ctx, req).await.map_err(|e| {
            tracing::error!(parent: &self.span, error = %e, "error in txn");
            e.into()
        })
    }

    async fn compact(
        &self,
        _ctx: RequestContext,
        req: CompactionRequest,
    ) -> BridgeResult<CompactionResponse> {
        Ok(CompactionResponse {
            header: Some(ResponseHeader::at_revision(req.revision)),
        })
    }
}
