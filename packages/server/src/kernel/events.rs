//! Structured worker events.
//!
//! All orchestrator components report lifecycle facts through a single sink.
//! The field names (`event`, `component`, `status`, `duration_ms`,
//! `entity_id`, `meta`) are a contract with log aggregators and must not
//! change shape.

use std::sync::Mutex;

use serde::Serialize;

/// Event names emitted by the orchestrator. Part of the logging contract.
pub mod names {
    pub const WORKER_CONFIG: &str = "worker.config";
    pub const WORKER_JOB: &str = "worker.job";
    pub const WORKER_RETRY_EXHAUSTED: &str = "worker.retry_exhausted";
    pub const LEASE: &str = "orchestrator.lease";
    pub const DISPATCH: &str = "orchestrator.dispatch";
    pub const HEARTBEAT: &str = "orchestrator.heartbeat";
    pub const COMMIT: &str = "orchestrator.commit";
    pub const DLQ: &str = "orchestrator.dlq";
    pub const TIMER_TICK: &str = "orchestrator.timer_tick";
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerEvent {
    pub event: &'static str,
    pub component: &'static str,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl WorkerEvent {
    pub fn new(event: &'static str, component: &'static str, status: impl Into<String>) -> Self {
        Self {
            event,
            component,
            status: status.into(),
            duration_ms: None,
            entity_id: None,
            meta: None,
        }
    }

    pub fn entity(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Destination for worker events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WorkerEvent);
}

/// Production sink: one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, e: WorkerEvent) {
        tracing::info!(
            event = e.event,
            component = e.component,
            status = %e.status,
            duration_ms = e.duration_ms,
            entity_id = e.entity_id.as_deref(),
            meta = e.meta.as_ref().map(|m| m.to_string()).as_deref(),
            "worker event"
        );
    }
}

/// Test sink that records every event for later assertions.
#[derive(Default)]
pub struct CapturingEventSink {
    events: Mutex<Vec<WorkerEvent>>,
}

impl CapturingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Count events matching `(event, status)`.
    pub fn count(&self, event: &str, status: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event == event && e.status == status)
            .count()
    }

    pub fn count_event(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event == event)
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl EventSink for CapturingEventSink {
    fn emit(&self, event: WorkerEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_contract_fields() {
        let e = WorkerEvent::new(names::COMMIT, "dispatcher", "ok")
            .entity("job-1")
            .duration_ms(42);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event"], "orchestrator.commit");
        assert_eq!(json["component"], "dispatcher");
        assert_eq!(json["status"], "ok");
        assert_eq!(json["duration_ms"], 42);
        assert_eq!(json["entity_id"], "job-1");
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn capturing_sink_counts_by_status() {
        let sink = CapturingEventSink::new();
        sink.emit(WorkerEvent::new(names::COMMIT, "dispatcher", "ok"));
        sink.emit(WorkerEvent::new(names::COMMIT, "dispatcher", "retry"));
        sink.emit(WorkerEvent::new(names::COMMIT, "dispatcher", "retry"));

        assert_eq!(sink.count(names::COMMIT, "ok"), 1);
        assert_eq!(sink.count(names::COMMIT, "retry"), 2);
        assert_eq!(sink.count_event(names::COMMIT), 3);
    }
}
