//! etcd adapter error mapping.
//!
//! Bridge errors map to gRPC status codes:
//! - Unsupported → INVALID_ARGUMENT
//! - DeleteUnsupported → UNIMPLEMENTED
//! - PutConflict → ABORTED
//! - InternalConsistency → INTERNAL
//! - Backend → derived from the backend error kind
//!
//! Messages are the error's display string, so clients see exactly
//! `"<field> is unsupported"` and `"delete is not supported"`.

use crate::core::error::{BackendError, BridgeError};

/// gRPC status codes used by etcd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

/// etcd error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdError {
    /// gRPC status code.
    pub code: GrpcCode,
    /// Error message.
    pub message: String,
}

/// Status code for a backend failure.
pub fn backend_code(err: &BackendError) -> GrpcCode {
    match err {
        BackendError::Unavailable { .. } => GrpcCode::Unavailable,
        BackendError::DeadlineExceeded => GrpcCode::DeadlineExceeded,
        BackendError::Cancelled => GrpcCode::Cancelled,
        BackendError::InvalidArgument { .. } => GrpcCode::InvalidArgument,
        BackendError::Internal { .. } => GrpcCode::Unknown,
    }
}

/// Convert a BridgeError to an etcd-compatible error response.
pub fn to_etcd_error(err: &BridgeError) -> EtcdError {
    let code = match err {
        BridgeError::Unsupported { .. } => GrpcCode::InvalidArgument,
        BridgeError::DeleteUnsupported => GrpcCode::Unimplemented,
        BridgeError::PutConflict { .. } => GrpcCode::Aborted,
        BridgeError::Backend(inner) => backend_code(inner),
        BridgeError::InternalConsistency { .. } => GrpcCode::Internal,
    };

    EtcdError {
        code,
        message: err.to_string(),
    }
}
