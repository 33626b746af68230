//! etcd transaction helpers.
//!
//! Builders and accessors over the wire Txn messages, compare evaluation for
//! backends that execute transactions, and the structural limits etcd applies
//! to a TxnRequest before running it.

use super::proto::compare::{CompareResult, CompareTarget, TargetUnion};
use super::proto::request_op::Request;
use super::proto::response_op::Response;
use super::proto::{
    Compare, KeyValue, PutRequest, PutResponse, RangeRequest, RangeResponse, RequestOp,
    ResponseOp, TxnRequest,
};
use std::collections::HashSet;

impl Compare {
    /// Assert that the mod revision of `key` equals `revision`.
    ///
    /// A revision of 0 asserts that the key does not exist.
    pub fn mod_revision_equals(key: impl Into<Vec<u8>>, revision: i64) -> Self {
        Self {
            result: CompareResult::Equal as i32,
            target: CompareTarget::Mod as i32,
            key: key.into(),
            range_end: Vec::new(),
            target_union: Some(TargetUnion::ModRevision(revision)),
        }
    }

    /// Evaluate this compare against the current record of one key.
    ///
    /// A missing key compares as a zero record, except that a value compare
    /// against a missing key never holds. Unknown operators, unknown targets and
    /// a target that disagrees with the union variant all evaluate to false.
    pub fn evaluate(&self, kv: Option<&KeyValue>) -> bool {
        let Ok(result) = CompareResult::try_from(self.result) else {
            return false;
        };
        let Ok(target) = CompareTarget::try_from(self.target) else {
            return false;
        };

        match (target, &self.target_union) {
            (CompareTarget::Version, Some(TargetUnion::Version(expected))) => {
                compare_values(kv.map_or(0, |kv| kv.version), *expected, result)
            }
            (CompareTarget::Create, Some(TargetUnion::CreateRevision(expected))) => {
                compare_values(kv.map_or(0, |kv| kv.create_revision), *expected, result)
            }
            (CompareTarget::Mod, Some(TargetUnion::ModRevision(expected))) => {
                compare_values(kv.map_or(0, |kv| kv.mod_revision), *expected, result)
            }
            (CompareTarget::Lease, Some(TargetUnion::Lease(expected))) => {
                compare_values(kv.map_or(0, |kv| kv.lease), *expected, result)
            }
            (CompareTarget::Value, Some(TargetUnion::Value(expected))) => match kv {
                Some(kv) => compare_bytes(&kv.value, expected, result),
                None => false,
            },
            _ => false,
        }
    }
}

fn compare_values(actual: i64, expected: i64, result: CompareResult) -> bool {
    match result {
        CompareResult::Equal => actual == expected,
        CompareResult::NotEqual => actual != expected,
        CompareResult::Greater => actual > expected,
        CompareResult::Less => actual < expected,
    }
}

fn compare_bytes(actual: &[u8], expected: &[u8], result: CompareResult) -> bool {
    match result {
        CompareResult::Equal => actual == expected,
        CompareResult::NotEqual => actual != expected,
        CompareResult::Greater => actual > expected,
        CompareResult::Less => actual < expected,
    }
}

impl RequestOp {
    /// Wrap a Range operation.
    pub fn range(req: RangeRequest) -> Self {
        Self {
            request: Some(Request::RequestRange(req)),
        }
    }

    /// Wrap a Put operation.
    pub fn put(req: PutRequest) -> Self {
        Self {
            request: Some(Request::RequestPut(req)),
        }
    }

    /// Wrap a nested transaction.
    pub fn txn(req: TxnRequest) -> Self {
        Self {
            request: Some(Request::RequestTxn(req)),
        }
    }
}

impl ResponseOp {
    /// Take the Put response out of this result, if it is one.
    pub fn into_put(self) -> Option<PutResponse> {
        match self.response {
            Some(Response::ResponsePut(resp)) => Some(resp),
            _ => None,
        }
    }

    /// Borrow the Range response, if this result is one.
    pub fn as_range(&self) -> Option<&RangeResponse> {
        match &self.response {
            Some(Response::ResponseRange(resp)) => Some(resp),
            _ => None,
        }
    }
}

/// Reasons a TxnRequest is structurally rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnValidationError {
    /// More operations than allowed in one branch.
    TooManyOperations { count: usize, max: usize },
    /// Nested transactions deeper than allowed.
    NestingTooDeep { depth: usize, max: usize },
    /// The same key is written twice within one branch.
    DuplicateKey,
    /// An operation with no request set.
    EmptyOperation,
}

impl std::fmt::Display for TxnValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyOperations { count, max } => {
                write!(f, "too many operations in txn request: {} > {}", count, max)
            }
            Self::NestingTooDeep { depth, max } => {
                write!(f, "txn nesting too deep: {} > {}", depth, max)
            }
            Self::DuplicateKey => write!(f, "duplicate key given in txn request"),
            Self::EmptyOperation => write!(f, "txn operation has no request"),
        }
    }
}

impl std::error::Error for TxnValidationError {}

/// Structural limits for transactions.
#[derive(Debug, Clone)]
pub struct TxnLimits {
    /// Maximum operations per branch.
    pub max_operations: usize,
    /// Maximum nesting depth for nested transactions.
    pub max_nesting_depth: usize,
}

impl Default for TxnLimits {
    fn default() -> Self {
        Self {
            // etcd's --max-txn-ops default
            max_operations: 128,
            max_nesting_depth: 4,
        }
    }
}

impl TxnRequest {
    /// Validate the transaction structure against `limits`.
    pub fn validate(&self, limits: &TxnLimits) -> Result<(), TxnValidationError> {
        self.validate_depth(limits, 0)
    }

    fn validate_depth(&self, limits: &TxnLimits, depth: usize) -> Result<(), TxnValidationError> {
        if depth > limits.max_nesting_depth {
            return Err(TxnValidationError::NestingTooDeep {
                depth,
                max: limits.max_nesting_depth,
            });
        }

        for branch in [&self.success, &self.failure] {
            if branch.len() > limits.max_operations {
                return Err(TxnValidationError::TooManyOperations {
                    count: branch.len(),
                    max: limits.max_operations,
                });
            }

            let mut written = HashSet::new();
            for op in branch {
                match &op.request {
                    Some(Request::RequestPut(put)) => {
                        if !written.insert(put.key.as_slice()) {
                            return Err(TxnValidationError::DuplicateKey);
                        }
                    }
                    Some(Request::RequestTxn(nested)) => nested.validate_depth(limits, depth + 1)?,
                    Some(_) => {}
                    None => return Err(TxnValidationError::EmptyOperation),
                }
            }
        }

        Ok(())
    }
}
