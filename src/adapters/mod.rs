//! Protocol adapters.
//!
//! Adapters translate an external protocol's request surface onto the
//! limited backend. The etcd v3 KV adapter is the only one implemented.
//!
//! Every adapter call carries a [`RequestContext`] that is handed unchanged
//! to each backend call it makes. The context holds the caller's deadline and
//! trace identifiers; adapters never add their own timeouts.

use std::time::{Duration, Instant};

pub mod etcd;

/// Request context propagated from the transport into every backend call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Point in time after which the caller no longer waits for a result.
    pub deadline: Option<Instant>,

    /// Trace ID for distributed tracing.
    pub trace_id: Option<String>,

    /// Span ID for distributed tracing.
    pub span_id: Option<String>,
}

impl RequestContext {
    /// Create an empty context with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set trace context.
    pub fn with_trace(mut self, trace_id: String, span_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self.span_id = Some(span_id);
        self
    }

    /// Time left before the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}
