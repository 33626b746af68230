//! Error types for the bridge and its backend.
//!
//! The bridge distinguishes caller-correctable rejections (unsupported options,
//! missing delete support, lost put races) from failures of the backend itself
//! and from backend responses that break the bridge's post-conditions. None of
//! them is retried here; retry policy belongs to the caller.

use thiserror::Error;

/// Errors reported by a limited backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Backend cannot serve requests right now.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// The request context deadline passed before the backend answered.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the request.
    #[error("context canceled")]
    Cancelled,

    /// Backend rejected the request shape.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Any other storage engine failure.
    #[error("backend failure: {message}")]
    Internal { message: String },
}

impl BackendError {
    /// Create an Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors returned by the KV bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Caller asked for a Range option the backend cannot honour.
    ///
    /// The field name is the wire protocol's JSON field name.
    #[error("{field} is unsupported")]
    Unsupported { field: &'static str },

    /// DeleteRange is never served by this bridge.
    #[error("delete is not supported")]
    DeleteUnsupported,

    /// The key changed between the observing read and the conditional write.
    #[error(
        "put conflict on key {key:?}: observed mod revision {observed_revision}, current {current_revision}"
    )]
    PutConflict {
        key: String,
        observed_revision: i64,
        current_revision: i64,
    },

    /// Backend call failed; surfaced unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Backend response violated the bridge's expected shape.
    #[error("internal consistency violation: {message}")]
    InternalConsistency { message: String },
}

impl BridgeError {
    /// Create an Unsupported error for the given wire field name.
    pub fn unsupported(field: &'static str) -> Self {
        Self::Unsupported { field }
    }

    /// Create an InternalConsistency error.
    pub fn internal_consistency(message: impl Into<String>) -> Self {
        Self::InternalConsistency {
            message: message.into(),
        }
    }

    /// Whether the caller can fix the request or simply retry it.
    pub fn is_caller_correctable(&self) -> bool {
        matches!(
            self,
            Self::Unsupported { .. } | Self::DeleteUnsupported | Self::PutConflict { .. }
        )
    }
}

/// Result type using BridgeError.
pub type BridgeResult<T> = Result<T, BridgeError>;
