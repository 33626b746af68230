//! Range validation and record translation.
//!
//! The backend's Range only supports exact-key and range lookups with no
//! filtering, ordering or staleness tolerance. Requests asking for more are
//! refused up front rather than answered approximately.

use super::proto::{self, RangeRequest};
use crate::backend;
use crate::core::error::{BridgeError, BridgeResult};

/// Reject Range options the backend cannot honour.
///
/// Fields are checked in a fixed order and the first non-default one is
/// reported by its wire (JSON) name. `limit`, `revision` and `count_only` pass
/// through to the backend.
pub fn validate_range(req: &RangeRequest) -> BridgeResult<()> {
    let checks: [(bool, &'static str); 8] = [
        (req.keys_only, "keysOnly"),
        (req.max_create_revision != 0, "maxCreateRevision"),
        (req.sort_order != 0, "sortOrder"),
        (req.sort_target != 0, "sortTarget"),
        (req.serializable, "serializable"),
        (req.min_mod_revision != 0, "minModRevision"),
        (req.min_create_revision != 0, "minCreateRevision"),
        (req.max_mod_revision != 0, "maxModRevision"),
    ];

    match checks.iter().find(|(set, _)| *set) {
        Some((_, field)) => Err(BridgeError::unsupported(*field)),
        None => Ok(()),
    }
}

/// Convert a backend record to the wire record.
///
/// The backend does not track a per-key version, so `version` stays 0.
pub fn to_kv(kv: backend::KeyValue) -> proto::KeyValue {
    proto::KeyValue {
        key: kv.key,
        create_revision: kv.create_revision,
        mod_revision: kv.mod_revision,
        version: 0,
        value: kv.value,
        lease: kv.lease,
    }
}

/// Convert backend records to wire records, preserving order.
pub fn to_kvs(kvs: Vec<backend::KeyValue>) -> Vec<proto::KeyValue> {
    kvs.into_iter().map(to_kv).collect()
}

/// Convert a wire record back to the backend's shape, dropping `version`.
pub fn from_kv(kv: proto::KeyValue) -> backend::KeyValue {
    backend::KeyValue {
        key: kv.key,
        value: kv.value,
        lease: kv.lease,
        create_revision: kv.create_revision,
        mod_revision: kv.mod_revision,
    }
}
