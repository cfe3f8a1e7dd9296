//! Core data model: events, chain-of-thought entries, and derived views.
//!
//! Persisted forms add `seq`, `schemaVersion`, and `sourceVersion` on top of
//! the wire form submitted by a producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Schema version stamped on every persisted record.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Severities that drop under ordinary (non-extreme) backpressure.
    pub fn droppable_under_backpressure(self) -> bool {
        matches!(self, Severity::Debug | Severity::Info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Observation,
    Analysis,
    Plan,
    Decision,
    Execute,
    Verify,
    Hypothesis,
    Critique,
}

impl Phase {
    /// Phases that drop under extreme backpressure (1.5x threshold), per §4.1.
    pub fn droppable_under_extreme_backpressure(self) -> bool {
        matches!(self, Phase::Observation | Phase::Analysis | Phase::Plan)
    }

    /// Category bucket name used by the derived reasoning counters.
    pub fn category(self) -> &'static str {
        match self {
            Phase::Observation => "observations",
            Phase::Analysis => "analyses",
            Phase::Plan => "plans",
            Phase::Decision => "decisions",
            Phase::Execute => "executions",
            Phase::Verify => "verifications",
            Phase::Hypothesis => "hypotheses",
            Phase::Critique => "critiques",
        }
    }
}

/// An event as submitted by a producer, before `seq` assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(rename = "spanId", skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl EventInput {
    pub fn new(event_type: impl Into<String>, severity: Severity, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            severity,
            source: source.into(),
            task_id: None,
            agent_id: None,
            trace_id: None,
            span_id: None,
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// A persisted/broadcast event: `EventInput` plus monotonic sequencing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "sourceVersion")]
    pub source_version: String,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(rename = "spanId", skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// A minified projection sent to non-verbose SSE subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EventProjection {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub severity: Severity,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl From<&Event> for EventProjection {
    fn from(e: &Event) -> Self {
        Self {
            id: e.id,
            event_type: e.event_type.clone(),
            severity: e.severity,
            task_id: e.task_id.clone(),
            timestamp: e.timestamp,
            source: e.source.clone(),
        }
    }
}

/// Chain-of-thought entry as submitted, before `seq` assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CotInput {
    pub id: Uuid,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub phase: Phase,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A persisted/broadcast CoT entry. `content` is absent when `redacted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CotEntry {
    pub seq: u64,
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "sourceVersion")]
    pub source_version: String,
    pub id: Uuid,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub redacted: bool,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverStatus {
    Running,
    Degraded,
    Stopped,
}

/// Derived status summary, served by `GET /observer/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub status: ObserverStatus,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
    #[serde(rename = "queueDepth")]
    pub queue_depth: u64,
    #[serde(rename = "maxQueueSize")]
    pub max_queue_size: u64,
    #[serde(rename = "observerDegraded")]
    pub observer_degraded: bool,
    #[serde(rename = "lastFlushMs")]
    pub last_flush_ms: Option<u64>,
    #[serde(rename = "activeFile")]
    pub active_file: Option<String>,
    #[serde(rename = "backpressureEvents")]
    pub backpressure_events: u64,
    #[serde(rename = "authConfigured")]
    pub auth_configured: bool,
}

/// Derived metrics snapshot, served by `GET /observer/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "reasoningDepthAvg")]
    pub reasoning_depth_avg: f64,
    #[serde(rename = "reasoningDepthP95")]
    pub reasoning_depth_p95: f64,
    #[serde(rename = "debateBreadthAvg")]
    pub debate_breadth_avg: f64,
    #[serde(rename = "taskSuccessRate")]
    pub task_success_rate: f64,
    #[serde(rename = "toolBudgetUtilization")]
    pub tool_budget_utilization: f64,
    #[serde(rename = "activeTasks")]
    pub active_tasks: u64,
    #[serde(rename = "queuedTasks")]
    pub queued_tasks: u64,
    #[serde(rename = "policyViolations")]
    pub policy_violations: u64,
    #[serde(rename = "queueDepth")]
    pub queue_depth: u64,
    #[serde(rename = "observerDegraded")]
    pub observer_degraded: bool,
    pub timestamp: DateTime<Utc>,
}

/// `GET /observer/progress` response.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub status: ObserverStatus,
    #[serde(rename = "reasoningSteps")]
    pub reasoning_steps: HashMap<String, u64>,
    #[serde(rename = "totalReasoningSteps")]
    pub total_reasoning_steps: u64,
    #[serde(rename = "uptimeMinutes")]
    pub uptime_minutes: f64,
}

/// Per-task aggregated view returned by `getTask`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub state: TaskState,
    pub events: Vec<Event>,
    #[serde(rename = "cotEntries")]
    pub cot_entries: Vec<CotEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
}

/// Subscriber filter predicate, set at connect-time and immutable
/// afterward — filter changes require reconnecting, not mutating mid-stream.
#[derive(Debug, Clone, Default)]
pub struct SubscriberFilter {
    pub task_id: Option<String>,
    pub event_type: Option<String>,
    pub severity: Option<Severity>,
}

impl SubscriberFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref t) = self.task_id {
            if event.task_id.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(ref ty) = self.event_type {
            if &event.event_type != ty {
                return false;
            }
        }
        if let Some(sev) = self.severity {
            if event.severity != sev {
                return false;
            }
        }
        true
    }
}
