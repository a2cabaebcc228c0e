//! Fire-and-forget diagnostics side channel
//!
//! Components report what they decided through a [`DiagnosticsSink`]. Sinks
//! cannot influence decisions: `record` returns nothing, and [`emit`] swallows
//! a panicking sink after logging it.

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::status::{StatusCode, SubStatusCode};

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DiagnosticKind {
    AttemptFailed {
        attempt: u32,
        status: StatusCode,
        sub_status: SubStatusCode,
        region: Option<String>,
    },
    RetryScheduled {
        attempt: u32,
        policy: String,
        delay_ms: u64,
    },
    GaveUp {
        attempts: u32,
        status: StatusCode,
        sub_status: SubStatusCode,
    },
    OperationCancelled {
        attempts: u32,
    },
    SessionTokenCleared {
        collection: String,
    },
    RegionMarkedUnavailable {
        region: String,
        for_writes: bool,
    },
    CircuitOpened {
        region: String,
        partition_key_range_id: String,
    },
    CircuitClosed {
        region: String,
        partition_key_range_id: String,
    },
    HedgeStarted {
        delay_ms: u64,
    },
    HedgeCompleted {
        alternate_won: bool,
    },
}

/// A diagnostic event with its timestamp and owning operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    pub at: DateTime<Utc>,
    pub activity_id: Option<Uuid>,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

impl DiagnosticEvent {
    pub fn new(kind: DiagnosticKind) -> Self {
        Self {
            at: Utc::now(),
            activity_id: None,
            kind,
        }
    }

    pub fn for_activity(activity_id: Uuid, kind: DiagnosticKind) -> Self {
        Self {
            at: Utc::now(),
            activity_id: Some(activity_id),
            kind,
        }
    }
}

/// Receives diagnostic events
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: DiagnosticEvent);
}

/// Hand an event to a sink, isolating the caller from a misbehaving sink
pub fn emit(sink: &dyn DiagnosticsSink, event: DiagnosticEvent) {
    if catch_unwind(AssertUnwindSafe(|| sink.record(event))).is_err() {
        tracing::warn!("diagnostics sink panicked; event dropped");
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl DiagnosticsSink for NoOpSink {
    fn record(&self, _event: DiagnosticEvent) {}
}

/// Logs events at DEBUG through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, event: DiagnosticEvent) {
        tracing::debug!(
            activity_id = ?event.activity_id,
            event = ?event.kind,
            "diagnostic event"
        );
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Count events matching a predicate
    pub fn count(&self, predicate: impl Fn(&DiagnosticKind) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| predicate(&e.kind))
            .count()
    }
}

impl DiagnosticsSink for CollectingSink {
    fn record(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}

impl<T: DiagnosticsSink + ?Sized> DiagnosticsSink for std::sync::Arc<T> {
    fn record(&self, event: DiagnosticEvent) {
        (**self).record(event)
    }
}
