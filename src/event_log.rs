//! Execution log for workflow runs
//!
//! One [`InvocationRecord`] is emitted per invocation attempt, wrapped in
//! `FUNCTION_END` or `FUNCTION_FAILED`. Persisting or visualising the log
//! is left to whoever holds the [`EventLog`]; it serializes to JSON.
//! - Event: envelope with id + timestamp + kind
//! - EventLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock; // 2-3x faster than std::sync::RwLock
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::Provider;

/// Whether a record comes from a real execution or a simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunKind {
    Exec,
    Sim,
}

/// Everything known about one invocation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Process-wide identity of the attempt (matches the `id=` in log lines)
    pub invocation_id: u64,
    /// Workflow execution this attempt belongs to
    pub execution_id: u64,
    pub endpoint: String,
    pub provider: Option<Provider>,
    pub deployment: Option<String>,
    pub node_name: Arc<str>,
    pub node_type: Arc<str>,
    /// Raw result payload as returned by the function
    pub result: Option<String>,
    /// Round-trip time minus the simulated time of used external services
    pub rtt_ms: u64,
    pub success: bool,
    /// `-1` outside a loop
    pub loop_counter: i64,
    pub max_loop_counter: i64,
    pub started_at: DateTime<Utc>,
    pub run_kind: RunKind,
}

/// Single event in the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since log creation (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    WorkflowStarted {
        execution_id: u64,
        root: Arc<str>,
        run_kind: RunKind,
    },
    WorkflowCompleted {
        success: bool,
        output: Value,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // INVOCATION LEVEL
    // ═══════════════════════════════════════════
    FunctionEnd(InvocationRecord),
    FunctionFailed(InvocationRecord),
}

impl EventKind {
    /// Wrap a record in the event matching its success flag
    pub fn for_record(record: InvocationRecord) -> Self {
        if record.success {
            Self::FunctionEnd(record)
        } else {
            Self::FunctionFailed(record)
        }
    }

    /// Extract the invocation record if this is an invocation event
    pub fn record(&self) -> Option<&InvocationRecord> {
        match self {
            Self::FunctionEnd(r) | Self::FunctionFailed(r) => Some(r),
            Self::WorkflowStarted { .. } | Self::WorkflowCompleted { .. } => None,
        }
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// All invocation records, in emission order
    pub fn records(&self) -> Vec<InvocationRecord> {
        self.events
            .read()
            .iter()
            .filter_map(|e| e.kind.record().cloned())
            .collect()
    }

    /// Invocation records of one node
    pub fn records_for(&self, node_name: &str) -> Vec<InvocationRecord> {
        self.records()
            .into_iter()
            .filter(|r| &*r.node_name == node_name)
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, success: bool) -> InvocationRecord {
        InvocationRecord {
            invocation_id: 7,
            execution_id: 1,
            endpoint: "https://x.azurewebsites.net/api/f".into(),
            provider: Some(Provider::Azure),
            deployment: None,
            node_name: name.into(),
            node_type: "addType".into(),
            result: Some(r#"{"sum":3}"#.into()),
            rtt_ms: 120,
            success,
            loop_counter: -1,
            max_loop_counter: -1,
            started_at: Utc::now(),
            run_kind: RunKind::Exec,
        }
    }

    #[test]
    fn record_event_matches_success_flag() {
        assert!(matches!(
            EventKind::for_record(record("f", true)),
            EventKind::FunctionEnd(_)
        ));
        assert!(matches!(
            EventKind::for_record(record("f", false)),
            EventKind::FunctionFailed(_)
        ));
    }

    #[test]
    fn events_serialize_with_screaming_tag() {
        let json = serde_json::to_value(EventKind::for_record(record("f", false))).unwrap();
        assert_eq!(json["type"], "FUNCTION_FAILED");
        assert_eq!(json["node_name"], "f");
        assert_eq!(json["run_kind"], "EXEC");
    }

    #[test]
    fn emit_assigns_sequential_ids() {
        let log = EventLog::new();
        let a = log.emit(EventKind::WorkflowStarted {
            execution_id: 1,
            root: "root".into(),
            run_kind: RunKind::Exec,
        });
        let b = log.emit(EventKind::for_record(record("f", true)));
        assert_eq!((a, b), (0, 1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.records().len(), 1);
    }

    #[test]
    fn records_for_filters_by_node() {
        let log = EventLog::new();
        log.emit(EventKind::for_record(record("a", true)));
        log.emit(EventKind::for_record(record("b", true)));
        log.emit(EventKind::for_record(record("a", false)));

        assert_eq!(log.records_for("a").len(), 2);
        assert_eq!(log.records_for("c").len(), 0);
    }

    #[test]
    fn to_json_is_an_array() {
        let log = EventLog::new();
        log.emit(EventKind::WorkflowCompleted {
            success: true,
            output: json!({"f/sum": 3.0}),
            total_duration_ms: 10,
        });
        let json = log.to_json();
        assert_eq!(json[0]["type"], "WORKFLOW_COMPLETED");
        assert_eq!(json[0]["output"]["f/sum"], 3.0);
    }
}
