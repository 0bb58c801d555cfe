//! Audit trail of mirror lifecycle transitions.
//!
//! Every mirror moves through `Due -> Queued -> Running -> Completed`, or
//! `Due -> Skipped`. Events are recorded by the scheduler and the pool so the
//! path each tick took can be reconstructed afterwards.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MirrorStatus;
use crate::util::clock::now_ms;

/// Why a due mirror did not run this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The access gate said no.
    AccessDenied,
    /// Too many runs of the mirror are already queued or running.
    Outstanding,
    /// The pool was shutting down.
    Shutdown,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AccessDenied => "access_denied",
            Self::Outstanding => "outstanding",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Logical state a mirror entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorPhase {
    /// The cron expression fired.
    Due,
    /// The tick ended without a run.
    Skipped(SkipReason),
    /// Admitted and waiting for a worker slot.
    Queued,
    /// A worker picked the run up.
    Running,
    /// The run finished.
    Completed(MirrorStatus),
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Run the event belongs to, once one exists.
    pub run_id: Option<Uuid>,
    /// Project-qualified mirror key.
    pub mirror: String,
    /// Phase entered.
    pub phase: MirrorPhase,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Bounded in-memory audit sink; the oldest events are dropped first.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(4_096))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events of one mirror, oldest first.
    #[must_use]
    pub fn events_for(&self, mirror: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.mirror == mirror)
            .cloned()
            .collect()
    }

    /// Number of stored events of `mirror` in `phase`.
    #[must_use]
    pub fn count(&self, mirror: &str, phase: MirrorPhase) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.mirror == mirror && e.phase == phase)
            .count()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_audit_event(
    mirror: impl Into<String>,
    run_id: Option<Uuid>,
    phase: MirrorPhase,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4(),
        run_id,
        mirror: mirror.into(),
        phase,
        created_at_ms: now_ms(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_event_is_dropped_on_overflow() {
        let sink = InMemoryAuditSink::new(2);
        sink.record(build_audit_event("p/a", None, MirrorPhase::Due, None));
        sink.record(build_audit_event("p/a", None, MirrorPhase::Queued, None));
        sink.record(build_audit_event("p/a", None, MirrorPhase::Running, None));

        let phases: Vec<_> = sink.events().into_iter().map(|e| e.phase).collect();
        assert_eq!(phases, vec![MirrorPhase::Queued, MirrorPhase::Running]);
    }

    #[test]
    fn count_filters_by_mirror_and_phase() {
        let sink = InMemoryAuditSink::new(10);
        let denied = MirrorPhase::Skipped(SkipReason::AccessDenied);
        sink.record(build_audit_event("p/a", None, denied, None));
        sink.record(build_audit_event("p/b", None, denied, None));
        sink.record(build_audit_event("p/a", None, MirrorPhase::Due, None));

        assert_eq!(sink.count("p/a", denied), 1);
        assert_eq!(sink.events_for("p/a").len(), 2);
    }
}
