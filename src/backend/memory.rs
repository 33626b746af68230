//! In-memory limited backend.
//!
//! Keeps the latest record per key in a `BTreeMap` behind a single mutex and a
//! store-wide revision counter. Every call takes the lock for its whole
//! duration, which makes transactions atomic and serializable.
//!
//! - A transaction that writes advances the revision exactly once; all of its
//!   writes share that revision.
//! - No history is retained: reads at any revision other than the current one
//!   are rejected.
//! - A failing operation rolls back everything the transaction already applied.

use super::{BackendRangeResponse, KeyValue, LimitedBackend};
use crate::adapters::etcd::proto::request_op::Request;
use crate::adapters::etcd::proto::response_op::Response;
use crate::adapters::etcd::proto::{
    self, Compare, DeleteRangeRequest, PutRequest, RangeRequest, RequestOp, ResponseHeader,
    ResponseOp, SortOrder, SortTarget, TxnRequest, TxnResponse,
};
use crate::adapters::etcd::txn::TxnLimits;
use crate::adapters::RequestContext;
use crate::core::error::{BackendError, BackendResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A stored record, including the version counter the internal KeyValue omits.
#[derive(Debug, Clone)]
struct StoredRecord {
    key: Vec<u8>,
    value: Vec<u8>,
    lease: i64,
    create_revision: i64,
    mod_revision: i64,
    version: i64,
}

impl StoredRecord {
    fn to_backend_kv(&self, keys_only: bool) -> KeyValue {
        KeyValue {
            key: self.key.clone(),
            value: if keys_only { Vec::new() } else { self.value.clone() },
            lease: self.lease,
            create_revision: self.create_revision,
            mod_revision: self.mod_revision,
        }
    }

    fn to_wire_kv(&self, keys_only: bool) -> proto::KeyValue {
        proto::KeyValue {
            key: self.key.clone(),
            create_revision: self.create_revision,
            mod_revision: self.mod_revision,
            version: self.version,
            value: if keys_only { Vec::new() } else { self.value.clone() },
            lease: self.lease,
        }
    }
}

/// Records selected by a range read, after filtering, sorting and limiting.
struct RangeSelection<'a> {
    records: Vec<&'a StoredRecord>,
    count: i64,
    more: bool,
    keys_only: bool,
}

#[derive(Default)]
struct MemoryState {
    revision: i64,
    index: BTreeMap<Vec<u8>, StoredRecord>,
}

impl MemoryState {
    /// Records in `[key, range_end)`, with the etcd conventions for an empty
    /// end (single key) and `[0]` (every key from `key` on).
    fn select(&self, key: &[u8], range_end: &[u8]) -> Vec<&StoredRecord> {
        if range_end.is_empty() {
            return self.index.get(key).into_iter().collect();
        }
        if range_end == [0u8].as_slice() {
            return self.index.range(key.to_vec()..).map(|(_, r)| r).collect();
        }
        if range_end <= key {
            return Vec::new();
        }
        self.index
            .range(key.to_vec()..range_end.to_vec())
            .map(|(_, r)| r)
            .collect()
    }

    fn read(&self, req: &RangeRequest) -> BackendResult<RangeSelection<'_>> {
        if req.revision > self.revision {
            return Err(BackendError::invalid_argument(
                "mvcc: required revision is a future revision",
            ));
        }
        if req.revision > 0 && req.revision < self.revision {
            return Err(BackendError::invalid_argument(format!(
                "historical reads are not retained (requested {}, current {})",
                req.revision, self.revision
            )));
        }

        let mut records: Vec<&StoredRecord> = self
            .select(&req.key, &req.range_end)
            .into_iter()
            .filter(|record| passes_revision_filters(record, req))
            .collect();
        sort_records(&mut records, req);

        let count = records.len() as i64;
        let mut more = false;
        if req.limit > 0 && records.len() > req.limit as usize {
            records.truncate(req.limit as usize);
            more = true;
        }
        if req.count_only {
            records.clear();
        }

        Ok(RangeSelection {
            records,
            count,
            more,
            keys_only: req.keys_only,
        })
    }
}

fn passes_revision_filters(record: &StoredRecord, req: &RangeRequest) -> bool {
    (req.min_mod_revision == 0 || record.mod_revision >= req.min_mod_revision)
        && (req.max_mod_revision == 0 || record.mod_revision <= req.max_mod_revision)
        && (req.min_create_revision == 0 || record.create_revision >= req.min_create_revision)
        && (req.max_create_revision == 0 || record.create_revision <= req.max_create_revision)
}

fn sort_records(records: &mut [&StoredRecord], req: &RangeRequest) {
    let order = SortOrder::try_from(req.sort_order).unwrap_or(SortOrder::None);
    let target = SortTarget::try_from(req.sort_target).unwrap_or(SortTarget::Key);
    if order == SortOrder::None && target == SortTarget::Key {
        // BTreeMap order is already ascending by key
        return;
    }

    records.sort_by(|a, b| match target {
        SortTarget::Key => a.key.cmp(&b.key),
        SortTarget::Version => a.version.cmp(&b.version),
        SortTarget::Create => a.create_revision.cmp(&b.create_revision),
        SortTarget::Mod => a.mod_revision.cmp(&b.mod_revision),
        SortTarget::Value => a.value.cmp(&b.value),
    });
    if order == SortOrder::Descend {
        records.reverse();
    }
}

/// Applies one transaction to the locked state, keeping an undo log.
struct TxnWriter<'a> {
    state: &'a mut MemoryState,
    /// Revision stamped on every write of this transaction.
    revision: i64,
    wrote: bool,
    undo: Vec<(Vec<u8>, Option<StoredRecord>)>,
}

impl TxnWriter<'_> {
    fn run(&mut self, req: &TxnRequest) -> BackendResult<TxnResponse> {
        let succeeded = req.compare.iter().all(|cmp| self.compare_holds(cmp));
        let branch = if succeeded { &req.success } else { &req.failure };

        let mut responses = Vec::with_capacity(branch.len());
        for op in branch {
            responses.push(self.apply(op)?);
        }

        Ok(TxnResponse {
            header: None,
            succeeded,
            responses,
        })
    }

    fn compare_holds(&self, cmp: &Compare) -> bool {
        if cmp.range_end.is_empty() {
            let current = self.state.index.get(&cmp.key).map(|r| r.to_wire_kv(false));
            return cmp.evaluate(current.as_ref());
        }

        let records = self.state.select(&cmp.key, &cmp.range_end);
        if records.is_empty() {
            return cmp.evaluate(None);
        }
        records
            .iter()
            .all(|record| cmp.evaluate(Some(&record.to_wire_kv(false))))
    }

    fn apply(&mut self, op: &RequestOp) -> BackendResult<ResponseOp> {
        let response = match &op.request {
            Some(Request::RequestRange(req)) => Response::ResponseRange(self.range(req)?),
            Some(Request::RequestPut(req)) => Response::ResponsePut(self.put(req)?),
            Some(Request::RequestDeleteRange(req)) => {
                Response::ResponseDeleteRange(self.delete_range(req))
            }
            Some(Request::RequestTxn(req)) => Response::ResponseTxn(self.run(req)?),
            None => {
                return Err(BackendError::invalid_argument(
                    "txn operation has no request",
                ))
            }
        };
        Ok(ResponseOp {
            response: Some(response),
        })
    }

    fn range(&self, req: &RangeRequest) -> BackendResult<proto::RangeResponse> {
        let selection = self.state.read(req)?;
        Ok(proto::RangeResponse {
            header: None,
            kvs: selection
                .records
                .iter()
                .map(|record| record.to_wire_kv(selection.keys_only))
                .collect(),
            more: selection.more,
            count: selection.count,
        })
    }

    fn put(&mut self, req: &PutRequest) -> BackendResult<proto::PutResponse> {
        if req.key.is_empty() {
            return Err(BackendError::invalid_argument(
                "etcdserver: key is not provided",
            ));
        }

        let prev = self.state.index.get(&req.key).cloned();
        let record = match &prev {
            Some(prev) => StoredRecord {
                key: req.key.clone(),
                value: if req.ignore_value {
                    prev.value.clone()
                } else {
                    req.value.clone()
                },
                lease: if req.ignore_lease { prev.lease } else { req.lease },
                create_revision: prev.create_revision,
                mod_revision: self.revision,
                version: prev.version + 1,
            },
            None if req.ignore_value || req.ignore_lease => {
                return Err(BackendError::invalid_argument("etcdserver: key not found"));
            }
            None => StoredRecord {
                key: req.key.clone(),
                value: req.value.clone(),
                lease: req.lease,
                create_revision: self.revision,
                mod_revision: self.revision,
                version: 1,
            },
        };

        self.undo.push((req.key.clone(), prev.clone()));
        self.state.index.insert(req.key.clone(), record);
        self.wrote = true;

        Ok(proto::PutResponse {
            header: None,
            prev_kv: if req.prev_kv {
                prev.map(|p| p.to_wire_kv(false))
            } else {
                None
            },
        })
    }

    fn delete_range(&mut self, req: &DeleteRangeRequest) -> proto::DeleteRangeResponse {
        let keys: Vec<Vec<u8>> = self
            .state
            .select(&req.key, &req.range_end)
            .into_iter()
            .map(|record| record.key.clone())
            .collect();

        let mut prev_kvs = Vec::new();
        for key in &keys {
            if let Some(prev) = self.state.index.remove(key) {
                if req.prev_kv {
                    prev_kvs.push(prev.to_wire_kv(false));
                }
                self.undo.push((key.clone(), Some(prev)));
            }
        }
        if !keys.is_empty() {
            self.wrote = true;
        }

        proto::DeleteRangeResponse {
            header: None,
            deleted: keys.len() as i64,
            prev_kvs,
        }
    }

    fn rollback(self) {
        let TxnWriter { state, undo, .. } = self;
        for (key, prev) in undo.into_iter().rev() {
            match prev {
                Some(record) => {
                    state.index.insert(key, record);
                }
                None => {
                    state.index.remove(&key);
                }
            }
        }
    }
}

fn stamp_headers(resp: &mut TxnResponse, header: &ResponseHeader) {
    resp.header = Some(header.clone());
    for op in &mut resp.responses {
        match &mut op.response {
            Some(Response::ResponseRange(r)) => r.header = Some(header.clone()),
            Some(Response::ResponsePut(r)) => r.header = Some(header.clone()),
            Some(Response::ResponseDeleteRange(r)) => r.header = Some(header.clone()),
            Some(Response::ResponseTxn(r)) => stamp_headers(r, header),
            None => {}
        }
    }
}

fn check_deadline(ctx: &RequestContext) -> BackendResult<()> {
    if ctx.is_expired() {
        return Err(BackendError::DeadlineExceeded);
    }
    Ok(())
}

/// Limited backend holding all records in memory.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    cluster_id: u64,
    member_id: u64,
    limits: TxnLimits,
}

impl MemoryBackend {
    /// Create an empty backend at revision 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            cluster_id: 0,
            member_id: 0,
            limits: TxnLimits::default(),
        }
    }

    /// Set the identity reported in response headers.
    pub fn with_identity(mut self, cluster_id: u64, member_id: u64) -> Self {
        self.cluster_id = cluster_id;
        self.member_id = member_id;
        self
    }

    /// Set transaction structure limits.
    pub fn with_limits(mut self, limits: TxnLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Current store revision.
    pub fn current_revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn header(&self, revision: i64) -> ResponseHeader {
        ResponseHeader {
            cluster_id: self.cluster_id,
            member_id: self.member_id,
            revision,
            raft_term: 1,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LimitedBackend for MemoryBackend {
    async fn range(
        &self,
        ctx: &RequestContext,
        req: RangeRequest,
    ) -> BackendResult<BackendRangeResponse> {
        check_deadline(ctx)?;

        let state = self.state.lock();
        let selection = state.read(&req)?;
        Ok(BackendRangeResponse {
            header: Some(self.header(state.revision)),
            kvs: selection
                .records
                .iter()
                .map(|record| record.to_backend_kv(selection.keys_only))
                .collect(),
            more: selection.more,
            count: selection.count,
        })
    }

    async fn txn(&self, ctx: &RequestContext, req: TxnRequest) -> BackendResult<TxnResponse> {
        check_deadline(ctx)?;
        req.validate(&self.limits)
            .map_err(|e| BackendError::invalid_argument(e.to_string()))?;

        let mut state = self.state.lock();
        let write_revision = state.revision + 1;
        let mut writer = TxnWriter {
            state: &mut *state,
            revision: write_revision,
            wrote: false,
            undo: Vec::new(),
        };

        match writer.run(&req) {
            Ok(mut resp) => {
                if writer.wrote {
                    writer.state.revision = write_revision;
                }
                let revision = writer.state.revision;
                stamp_headers(&mut resp, &self.header(revision));
                tracing::debug!(
                    succeeded = resp.succeeded,
                    revision,
                    "memory backend applied txn"
                );
                Ok(resp)
            }
            Err(e) => {
                writer.rollback();
                Err(e)
            }
        }
    }
}
