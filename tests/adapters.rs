//! Adapter integration tests.
//!
//! Tests for the etcd KV bridge against recording and scripted backends.

mod common;

use common::{seed, FailingBackend, RecordingBackend, YieldingBackend};
use kvbridge::adapters::etcd::kv::from_kv;
use kvbridge::adapters::etcd::proto::compare::{CompareResult, CompareTarget, TargetUnion};
use kvbridge::adapters::etcd::proto::request_op::Request;
use kvbridge::adapters::etcd::{
    to_etcd_error, to_kv, to_kvs, CompactionRequest, DeleteRangeRequest, GrpcCode, KvBridge,
    KvServer, PutRequest, RangeRequest, RequestOp, ResponseHeader, ResponseOp, TxnRequest,
    TxnResponse,
};
use kvbridge::adapters::RequestContext;
use kvbridge::backend::{self, BackendRangeResponse};
use kvbridge::core::error::{BackendError, BridgeError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn ctx() -> RequestContext {
    RequestContext::new()
}

fn record(key: &str, value: &str, mod_revision: i64) -> backend::KeyValue {
    backend::KeyValue {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
        lease: 0,
        create_revision: 1,
        mod_revision,
    }
}

// ============================================================================
// Range validation
// ============================================================================

#[tokio::test]
async fn range_rejects_each_unsupported_field_without_backend_calls() {
    let cases: Vec<(RangeRequest, &str)> = vec![
        (
            RangeRequest {
                keys_only: true,
                ..RangeRequest::key("a")
            },
            "keysOnly",
        ),
        (
            RangeRequest {
                max_create_revision: 3,
                ..RangeRequest::key("a")
            },
            "maxCreateRevision",
        ),
        (
            RangeRequest {
                sort_order: 2,
                ..RangeRequest::key("a")
            },
            "sortOrder",
        ),
        (
            RangeRequest {
                sort_target: 3,
                ..RangeRequest::key("a")
            },
            "sortTarget",
        ),
        (
            RangeRequest {
                serializable: true,
                ..RangeRequest::key("a")
            },
            "serializable",
        ),
        (
            RangeRequest {
                min_mod_revision: 1,
                ..RangeRequest::key("a")
            },
            "minModRevision",
        ),
        (
            RangeRequest {
                min_create_revision: 1,
                ..RangeRequest::key("a")
            },
            "minCreateRevision",
        ),
        (
            RangeRequest {
                max_mod_revision: 9,
                ..RangeRequest::key("a")
            },
            "maxModRevision",
        ),
    ];

    let bridge = KvBridge::new(RecordingBackend::new());
    for (req, field) in cases {
        let err = bridge.range(ctx(), req).await.unwrap_err();
        assert_eq!(err, BridgeError::Unsupported { field });
        assert_eq!(err.to_string(), format!("{} is unsupported", field));
    }
    assert_eq!(bridge.backend().total_calls(), 0);
}

#[tokio::test]
async fn range_reports_first_field_in_check_order() {
    let bridge = KvBridge::new(RecordingBackend::new());
    let req = RangeRequest {
        max_mod_revision: 1,
        serializable: true,
        keys_only: true,
        ..RangeRequest::key("a")
    };
    let err = bridge.range(ctx(), req).await.unwrap_err();
    assert_eq!(err.to_string(), "keysOnly is unsupported");
}

#[tokio::test]
async fn range_passes_limit_revision_and_count_only() {
    let bridge = KvBridge::new(RecordingBackend::new());
    bridge
        .backend()
        .script_range(Ok(BackendRangeResponse::default()));

    let req = RangeRequest {
        limit: 5,
        revision: 0,
        count_only: true,
        ..RangeRequest::range("a", "z")
    };
    bridge.range(ctx(), req.clone()).await.unwrap();

    assert_eq!(bridge.backend().ranges(), vec![req]);
}

// ============================================================================
// Range dispatch
// ============================================================================

#[tokio::test]
async fn range_translates_backend_response_field_for_field() {
    let header = ResponseHeader {
        cluster_id: 9,
        member_id: 8,
        revision: 77,
        raft_term: 3,
    };
    let kvs = vec![
        backend::KeyValue {
            key: b"b".to_vec(),
            value: b"2".to_vec(),
            lease: 12,
            create_revision: 4,
            mod_revision: 70,
        },
        record("a", "1", 5),
    ];

    let bridge = KvBridge::new(RecordingBackend::new());
    bridge.backend().script_range(Ok(BackendRangeResponse {
        header: Some(header.clone()),
        kvs: kvs.clone(),
        more: true,
        count: 5,
    }));

    let resp = bridge.range(ctx(), RangeRequest::key("a")).await.unwrap();
    assert_eq!(resp.header, Some(header));
    assert!(resp.more);
    assert_eq!(resp.count, 5);
    assert_eq!(resp.kvs.len(), 2);

    // Order is the backend's, not re-sorted.
    assert_eq!(resp.kvs[0].key, b"b");
    assert_eq!(resp.kvs[0].lease, 12);
    assert_eq!(resp.kvs[0].create_revision, 4);
    assert_eq!(resp.kvs[0].mod_revision, 70);
    assert_eq!(resp.kvs[0].value, b"2");
    assert_eq!(resp.kvs[0].version, 0);
    assert_eq!(resp.kvs[1].key, b"a");
}

#[tokio::test]
async fn range_with_no_records_returns_empty_kvs() {
    let bridge = KvBridge::new(RecordingBackend::new());
    let resp = bridge.range(ctx(), RangeRequest::key("missing")).await.unwrap();
    assert!(resp.kvs.is_empty());
    assert_eq!(resp.count, 0);
    assert!(!resp.more);
}

#[tokio::test]
async fn range_returns_backend_error_unchanged() {
    let bridge = KvBridge::new(FailingBackend::new(BackendError::unavailable("down")));
    let err = bridge.range(ctx(), RangeRequest::key("a")).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::Backend(BackendError::unavailable("down"))
    );
    assert_eq!(err.to_string(), "backend unavailable: down");
    assert_eq!(
        bridge
            .backend()
            .calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn request_context_reaches_every_backend_call() {
    let bridge = KvBridge::new(RecordingBackend::new());
    let ctx = RequestContext::new().with_timeout(Duration::from_secs(30));
    let deadline = ctx.deadline;

    bridge.range(ctx.clone(), RangeRequest::key("a")).await.unwrap();
    bridge.put(ctx, PutRequest::new("a", "1")).await.unwrap();

    let deadlines = bridge.backend().deadlines();
    assert_eq!(deadlines.len(), 3);
    assert!(deadlines.iter().all(|d| *d == deadline));
}

// ============================================================================
// Put
// ============================================================================

#[tokio::test]
async fn put_on_missing_key_compares_against_zero() {
    let bridge = KvBridge::new(RecordingBackend::new());
    bridge
        .put(ctx(), PutRequest::new("fresh", "v"))
        .await
        .unwrap();

    let txns = bridge.backend().txns();
    assert_eq!(txns.len(), 1);
    let cmp = &txns[0].compare[0];
    assert_eq!(txns[0].compare.len(), 1);
    assert_eq!(cmp.key, b"fresh");
    assert_eq!(cmp.target, CompareTarget::Mod as i32);
    assert_eq!(cmp.result, CompareResult::Equal as i32);
    assert_eq!(cmp.target_union, Some(TargetUnion::ModRevision(0)));

    let resp = bridge.range(ctx(), RangeRequest::key("fresh")).await.unwrap();
    assert_eq!(resp.kvs.len(), 1);
    assert!(resp.kvs[0].mod_revision > 0);
}

#[tokio::test]
async fn put_builds_success_and_failure_branches() {
    let bridge = KvBridge::new(RecordingBackend::new());
    let seeded = seed(&bridge.backend().inner, "k", "old").await;
    let seeded_revision = seeded.header.unwrap().revision;

    let put = PutRequest {
        lease: 7,
        prev_kv: true,
        ..PutRequest::new("k", "new")
    };
    let resp = bridge.put(ctx(), put.clone()).await.unwrap();

    let txn = &bridge.backend().txns()[0];
    assert_eq!(
        txn.compare[0].target_union,
        Some(TargetUnion::ModRevision(seeded_revision))
    );
    assert_eq!(txn.success, vec![RequestOp::put(put)]);
    assert_eq!(
        txn.failure,
        vec![RequestOp::range(RangeRequest::key("k"))]
    );
    assert_eq!(resp.prev_kv.unwrap().value, b"old");
    assert_eq!(resp.header.unwrap().revision, seeded_revision + 1);
}

#[tokio::test]
async fn put_returns_embedded_put_response_verbatim() {
    let embedded = kvbridge::adapters::etcd::PutResponse {
        header: Some(ResponseHeader::at_revision(41)),
        prev_kv: None,
    };
    let bridge = KvBridge::new(RecordingBackend::new());
    bridge.backend().script_txn(Ok(TxnResponse {
        header: Some(ResponseHeader::at_revision(41)),
        succeeded: true,
        responses: vec![ResponseOp {
            response: Some(
                kvbridge::adapters::etcd::proto::response_op::Response::ResponsePut(
                    embedded.clone(),
                ),
            ),
        }],
    }));

    let resp = bridge.put(ctx(), PutRequest::new("k", "v")).await.unwrap();
    assert_eq!(resp, embedded);
}

#[tokio::test]
async fn put_loses_race_to_interleaved_writer() {
    let bridge = KvBridge::new(RecordingBackend::new());
    bridge
        .backend()
        .interfere_before_next_txn(PutRequest::new("k", "theirs"));

    let err = bridge
        .put(ctx(), PutRequest::new("k", "mine"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::PutConflict {
            key: "k".to_string(),
            observed_revision: 0,
            current_revision: 1,
        }
    );
    assert!(err.is_caller_correctable());
    assert_eq!(to_etcd_error(&err).code, GrpcCode::Aborted);

    // The other writer's value survives and no retry happened.
    let resp = bridge.range(ctx(), RangeRequest::key("k")).await.unwrap();
    assert_eq!(resp.kvs[0].value, b"theirs");
    assert_eq!(bridge.backend().txn_calls(), 1);
}

#[tokio::test]
async fn put_with_empty_success_results_is_internal_consistency_error() {
    let bridge = KvBridge::new(RecordingBackend::new());
    bridge.backend().script_txn(Ok(TxnResponse {
        header: Some(ResponseHeader::at_revision(1)),
        succeeded: true,
        responses: vec![],
    }));

    let err = bridge
        .put(ctx(), PutRequest::new("k", "v"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InternalConsistency { .. }));
    assert_eq!(to_etcd_error(&err).code, GrpcCode::Internal);
}

#[tokio::test]
async fn put_with_non_put_first_result_is_internal_consistency_error() {
    let bridge = KvBridge::new(RecordingBackend::new());
    bridge.backend().script_txn(Ok(TxnResponse {
        header: None,
        succeeded: true,
        responses: vec![ResponseOp {
            response: Some(
                kvbridge::adapters::etcd::proto::response_op::Response::ResponseRange(
                    Default::default(),
                ),
            ),
        }],
    }));

    let err = bridge
        .put(ctx(), PutRequest::new("k", "v"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InternalConsistency { .. }));
}

#[tokio::test]
async fn put_stops_after_failed_observe() {
    let bridge = KvBridge::new(RecordingBackend::new());
    bridge
        .backend()
        .script_range(Err(BackendError::DeadlineExceeded));

    let err = bridge
        .put(ctx(), PutRequest::new("k", "v"))
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::Backend(BackendError::DeadlineExceeded));
    assert_eq!(bridge.backend().txn_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_commit_once_per_observed_revision() {
    let bridge = Arc::new(KvBridge::new(YieldingBackend::default()));
    seed(&bridge.backend().inner, "hot", "v0").await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let bridge = bridge.clone();
        handles.push(tokio::spawn(async move {
            bridge
                .put(RequestContext::new(), PutRequest::new("hot", format!("v{}", i + 1)))
                .await
        }));
    }

    let mut committed = HashSet::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(resp) => {
                let revision = resp.header.unwrap().revision;
                assert!(committed.insert(revision), "revision {} committed twice", revision);
            }
            Err(BridgeError::PutConflict {
                observed_revision,
                current_revision,
                ..
            }) => {
                assert!(current_revision > observed_revision);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert!(!committed.is_empty());
    assert_eq!(committed.len() + conflicts, 16);
    // Seed plus one revision per committed put.
    assert_eq!(
        bridge.backend().inner.current_revision(),
        1 + committed.len() as i64
    );
}

// ============================================================================
// DeleteRange, Txn, Compact
// ============================================================================

#[tokio::test]
async fn delete_range_is_always_refused() {
    let bridge = KvBridge::new(RecordingBackend::new());
    for req in [
        DeleteRangeRequest::default(),
        DeleteRangeRequest {
            key: b"a".to_vec(),
            range_end: vec![0],
            prev_kv: true,
        },
    ] {
        let err = bridge.delete_range(ctx(), req).await.unwrap_err();
        assert_eq!(err, BridgeError::DeleteUnsupported);
        assert_eq!(err.to_string(), "delete is not supported");
        assert_eq!(to_etcd_error(&err).code, GrpcCode::Unimplemented);
    }
    assert_eq!(bridge.backend().total_calls(), 0);
}

#[tokio::test]
async fn txn_is_forwarded_verbatim() {
    let req = TxnRequest {
        compare: vec![kvbridge::adapters::etcd::Compare::mod_revision_equals("a", 3)],
        success: vec![RequestOp {
            request: Some(Request::RequestDeleteRange(DeleteRangeRequest {
                key: b"a".to_vec(),
                range_end: vec![],
                prev_kv: false,
            })),
        }],
        failure: vec![RequestOp::range(RangeRequest {
            sort_order: 1,
            ..RangeRequest::key("a")
        })],
    };
    let scripted = TxnResponse {
        header: Some(ResponseHeader::at_revision(3)),
        succeeded: false,
        responses: vec![],
    };

    let bridge = KvBridge::new(RecordingBackend::new());
    bridge.backend().script_txn(Ok(scripted.clone()));

    let resp = bridge.txn(ctx(), req.clone()).await.unwrap();
    assert_eq!(resp, scripted);
    assert_eq!(bridge.backend().txns(), vec![req]);
    assert_eq!(bridge.backend().range_calls(), 0);
}

#[tokio::test]
async fn txn_backend_error_is_returned_unchanged() {
    let bridge = KvBridge::new(FailingBackend::new(BackendError::internal("disk on fire")));
    let err = bridge
        .txn(ctx(), TxnRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::Backend(BackendError::internal("disk on fire")));
    assert_eq!(to_etcd_error(&err).code, GrpcCode::Unknown);
}

#[tokio::test]
async fn compact_echoes_revision_without_backend_calls() {
    let bridge = KvBridge::new(RecordingBackend::new());
    for revision in [42, 0, -5] {
        let resp = bridge
            .compact(
                ctx(),
                CompactionRequest {
                    revision,
                    physical: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.header.unwrap().revision, revision);
    }
    assert_eq!(bridge.backend().total_calls(), 0);
}

// ============================================================================
// Record translation
// ============================================================================

#[test]
fn to_kv_round_trip_preserves_fields() {
    let original = backend::KeyValue {
        key: b"key".to_vec(),
        value: b"value".to_vec(),
        lease: 99,
        create_revision: 3,
        mod_revision: 8,
    };
    let wire = to_kv(original.clone());
    assert_eq!(wire.key, original.key);
    assert_eq!(wire.value, original.value);
    assert_eq!(wire.lease, 99);
    assert_eq!(wire.create_revision, 3);
    assert_eq!(wire.mod_revision, 8);
    assert_eq!(from_kv(wire), original);
}

#[test]
fn to_kvs_preserves_order_and_handles_empty() {
    assert!(to_kvs(vec![]).is_empty());

    let kvs = to_kvs(vec![record("z", "1", 2), record("a", "2", 3)]);
    let keys: Vec<&[u8]> = kvs.iter().map(|kv| kv.key.as_slice()).collect();
    assert_eq!(keys, vec![b"z".as_slice(), b"a".as_slice()]);
}
