//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use async_trait::async_trait;
use kvbridge::adapters::etcd::{PutRequest, RangeRequest, RequestOp, TxnRequest, TxnResponse};
use kvbridge::adapters::RequestContext;
use kvbridge::backend::{BackendRangeResponse, LimitedBackend, MemoryBackend};
use kvbridge::core::error::{BackendError, BackendResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tempfile::NamedTempFile;

/// Backend that records every call and can be scripted per call.
///
/// Unscripted calls fall through to an in-memory backend.
#[derive(Default)]
pub struct RecordingBackend {
    pub inner: MemoryBackend,
    range_calls: AtomicUsize,
    txn_calls: AtomicUsize,
    ranges: Mutex<Vec<RangeRequest>>,
    txns: Mutex<Vec<TxnRequest>>,
    deadlines: Mutex<Vec<Option<Instant>>>,
    scripted_ranges: Mutex<VecDeque<BackendResult<BackendRangeResponse>>>,
    scripted_txns: Mutex<VecDeque<BackendResult<TxnResponse>>>,
    interfering_put: Mutex<Option<PutRequest>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next Range call with `result`.
    pub fn script_range(&self, result: BackendResult<BackendRangeResponse>) {
        self.scripted_ranges.lock().push_back(result);
    }

    /// Answer the next Txn call with `result`.
    pub fn script_txn(&self, result: BackendResult<TxnResponse>) {
        self.scripted_txns.lock().push_back(result);
    }

    /// Apply `put` directly to the store right before the next Txn runs,
    /// as if another writer won the race.
    pub fn interfere_before_next_txn(&self, put: PutRequest) {
        *self.interfering_put.lock() = Some(put);
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    pub fn txn_calls(&self) -> usize {
        self.txn_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.range_calls() + self.txn_calls()
    }

    pub fn ranges(&self) -> Vec<RangeRequest> {
        self.ranges.lock().clone()
    }

    pub fn txns(&self) -> Vec<TxnRequest> {
        self.txns.lock().clone()
    }

    pub fn deadlines(&self) -> Vec<Option<Instant>> {
        self.deadlines.lock().clone()
    }
}

#[async_trait]
impl LimitedBackend for RecordingBackend {
    async fn range(
        &self,
        ctx: &RequestContext,
        req: RangeRequest,
    ) -> BackendResult<BackendRangeResponse> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.ranges.lock().push(req.clone());
        self.deadlines.lock().push(ctx.deadline);

        let scripted = self.scripted_ranges.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => self.inner.range(ctx, req).await,
        }
    }

    async fn txn(&self, ctx: &RequestContext, req: TxnRequest) -> BackendResult<TxnResponse> {
        self.txn_calls.fetch_add(1, Ordering::SeqCst);
        self.txns.lock().push(req.clone());
        self.deadlines.lock().push(ctx.deadline);

        let interfering = self.interfering_put.lock().take();
        if let Some(put) = interfering {
            let sneak = TxnRequest {
                compare: vec![],
                success: vec![RequestOp::put(put)],
                failure: vec![],
            };
            self.inner.txn(&RequestContext::new(), sneak).await?;
        }

        let scripted = self.scripted_txns.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => self.inner.txn(ctx, req).await,
        }
    }
}

/// Backend whose every call fails with the same error.
pub struct FailingBackend {
    pub error: BackendError,
    pub calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new(error: BackendError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LimitedBackend for FailingBackend {
    async fn range(
        &self,
        _ctx: &RequestContext,
        _req: RangeRequest,
    ) -> BackendResult<BackendRangeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    async fn txn(&self, _ctx: &RequestContext, _req: TxnRequest) -> BackendResult<TxnResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Backend that yields to the scheduler inside each call so concurrent
/// callers interleave between observe and commit.
#[derive(Default)]
pub struct YieldingBackend {
    pub inner: MemoryBackend,
    pub yielded: AtomicBool,
}

#[async_trait]
impl LimitedBackend for YieldingBackend {
    async fn range(
        &self,
        ctx: &RequestContext,
        req: RangeRequest,
    ) -> BackendResult<BackendRangeResponse> {
        let resp = self.inner.range(ctx, req).await;
        tokio::task::yield_now().await;
        self.yielded.store(true, Ordering::SeqCst);
        resp
    }

    async fn txn(&self, ctx: &RequestContext, req: TxnRequest) -> BackendResult<TxnResponse> {
        tokio::task::yield_now().await;
        self.inner.txn(ctx, req).await
    }
}

/// Put `value` at `key` through the backend directly.
pub async fn seed<B: LimitedBackend>(backend: &B, key: &str, value: &str) -> TxnResponse {
    let txn = TxnRequest {
        compare: vec![],
        success: vec![RequestOp::put(PutRequest::new(key, value))],
        failure: vec![],
    };
    backend
        .txn(&RequestContext::new(), txn)
        .await
        .expect("seed put failed")
}

/// Write `content` to a temporary config file.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    create_config(
        r#"
[listener]
bind = "127.0.0.1:0"
"#,
    )
}

/// Create a configuration with custom settings.
pub fn create_config_with_settings(bind: &str, member_id: u64, log_level: &str) -> NamedTempFile {
    create_config(&format!(
        r#"
[listener]
bind = "{}"

[cluster]
cluster_id = 100
member_id = {}

[backend]
mode = "memory"

[telemetry]
log_level = "{}"
"#,
        bind, member_id, log_level
    ))
}
