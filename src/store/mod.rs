//! Ingest/Store: the single write path for events and chain-of-thought
//! entries, plus the query operations the HTTP API exposes.
//!
//! A short lock does sequencing and ring maintenance; the actual disk
//! write and broadcast happen outside it.

mod counters;
mod task_state;

pub use counters::Counters;
pub use task_state::TaskStateMachine;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::broadcast::Broadcaster;
use crate::config::ObserverConfig;
use crate::cursor::{decode_cursor, encode_cursor};
use crate::error::{NotFoundError, ObserverError, ObserverResult, ValidationError};
use crate::metrics_file::MetricsFileWriter;
use crate::redact::Redactor;
use crate::types::{
    CotEntry, CotInput, Event, EventInput, MetricsSnapshot, Phase, ProgressSummary, Severity,
    StatusSummary, TaskView, SCHEMA_VERSION,
};
use crate::writer::AsyncWriter;

const RING_CAPACITY: usize = 5000;
const SOURCE_VERSION: &str = env!("CARGO_PKG_VERSION");

const EVENTS_DEFAULT_LIMIT: u64 = 100;
const EVENTS_MAX_LIMIT: u64 = 500;
const COT_DEFAULT_LIMIT: u64 = 50;
const COT_MAX_LIMIT: u64 = 200;

/// Outcome of a `recordEvent`/`recordChainOfThought` call. Backpressure
/// drops are observable only via the counter, never an error.
#[derive(Debug, Clone)]
pub enum RecordOutcome<T> {
    Recorded(T),
    Dropped,
}

struct StoreInner {
    next_seq: u64,
    events: VecDeque<Event>,
    cot: VecDeque<CotEntry>,
    counters: Counters,
    task_state: TaskStateMachine,
}

impl Default for StoreInner {
    fn default() -> Self {
        Self {
            next_seq: 1,
            events: VecDeque::new(),
            cot: VecDeque::new(),
            counters: Counters::default(),
            task_state: TaskStateMachine::default(),
        }
    }
}

#[derive(Default, Clone)]
pub struct ListEventsQuery {
    pub cursor: Option<String>,
    pub limit: Option<u64>,
    pub since: Option<chrono::DateTime<Utc>>,
    pub until: Option<chrono::DateTime<Utc>>,
    pub task_id: Option<String>,
    pub event_type: Option<String>,
    pub severity: Option<Severity>,
}

pub struct ListEventsResult {
    pub events: Vec<Event>,
    pub next_cursor: Option<String>,
}

#[derive(Default, Clone)]
pub struct ListCotQuery {
    pub cursor: Option<String>,
    pub limit: Option<u64>,
    pub since: Option<chrono::DateTime<Utc>>,
    pub until: Option<chrono::DateTime<Utc>>,
    pub task_id: Option<String>,
    pub phase: Option<Phase>,
}

pub struct ListCotResult {
    pub entries: Vec<CotEntry>,
    pub next_cursor: Option<String>,
}

/// Persistence handles held behind their own `Arc` so background tasks
/// spawned out of the write path can outlive the call that spawned them
/// without needing a strong reference back to the whole store.
struct Persistence {
    events_writer: AsyncWriter,
    cot_writer: AsyncWriter,
    metrics_writer: MetricsFileWriter,
    pending_writes: AtomicU64,
    degraded: AtomicBool,
    last_flush_ms: Mutex<Option<u64>>,
}

/// The Ingest/Store core. One instance owns both ring buffers, both
/// persistence streams, the broadcaster, and all derived counters.
pub struct IngestStore {
    config: ObserverConfig,
    redactor: Redactor,
    persistence: Arc<Persistence>,
    broadcaster: Arc<Broadcaster>,
    inner: Mutex<StoreInner>,
    backpressure_events: AtomicU64,
    started_at: chrono::DateTime<Utc>,
}

impl IngestStore {
    pub fn new(config: ObserverConfig, broadcaster: Arc<Broadcaster>) -> ObserverResult<Self> {
        let redactor = Redactor::from_config(&config.redaction_rules, config.privacy_mode)
            .map_err(|e| ObserverError::Internal(format!("invalid redaction rule: {e}")))?;

        let events_writer = AsyncWriter::spawn(config.data_dir.clone(), "events", config.rotation_bytes)
            .map_err(|e| ObserverError::Internal(format!("failed to start events writer: {e}")))?;
        let cot_writer = AsyncWriter::spawn(config.data_dir.clone(), "cot", config.rotation_bytes)
            .map_err(|e| ObserverError::Internal(format!("failed to start cot writer: {e}")))?;
        let metrics_writer = MetricsFileWriter::new(&config.data_dir)
            .map_err(|e| ObserverError::Internal(format!("failed to init metrics file: {e}")))?;

        Ok(Self {
            config,
            redactor,
            persistence: Arc::new(Persistence {
                events_writer,
                cot_writer,
                metrics_writer,
                pending_writes: AtomicU64::new(0),
                degraded: AtomicBool::new(false),
                last_flush_ms: Mutex::new(None),
            }),
            broadcaster,
            inner: Mutex::new(StoreInner::default()),
            backpressure_events: AtomicU64::new(0),
            started_at: Utc::now(),
        })
    }

    /// `recordEvent`. Sequencing, redaction, ring maintenance, and counter
    /// updates happen synchronously under the lock; the actual append to
    /// disk and fan-out to subscribers happen after it releases.
    pub fn record_event(&self, mut input: EventInput) -> ObserverResult<RecordOutcome<Event>> {
        if input.event_type.trim().is_empty() {
            return Err(ValidationError::MissingField("type".into()).into());
        }
        if input.source.trim().is_empty() {
            return Err(ValidationError::MissingField("source".into()).into());
        }

        let pending = self.persistence.pending_writes.load(Ordering::SeqCst);
        if pending >= self.config.max_queue_size && input.severity.droppable_under_backpressure() {
            self.backpressure_events.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(event_type = %input.event_type, "dropping event under backpressure");
            return Ok(RecordOutcome::Dropped);
        }

        input.metadata = self.redactor.redact_value(&input.metadata);

        let event = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let event = Event {
                seq,
                schema_version: SCHEMA_VERSION,
                source_version: SOURCE_VERSION.to_string(),
                id: input.id,
                event_type: input.event_type.clone(),
                severity: input.severity,
                source: input.source.clone(),
                task_id: input.task_id.clone(),
                agent_id: input.agent_id.clone(),
                trace_id: input.trace_id.clone(),
                span_id: input.span_id.clone(),
                correlation_id: input.correlation_id.clone(),
                timestamp: input.timestamp,
                metadata: input.metadata.clone(),
            };

            if inner.events.len() >= RING_CAPACITY {
                inner.events.pop_front();
            }
            inner.events.push_back(event.clone());

            inner.task_state.apply(&event.event_type, event.task_id.as_deref());
            inner.counters.record_task_outcome(&event.event_type, &event.metadata);
            inner.counters.record_policy_event(&event.event_type, &event.metadata);
            inner.counters.record_budget_event(&event.event_type, &event.metadata);

            event
        };

        self.persistence.pending_writes.fetch_add(1, Ordering::SeqCst);
        self.broadcaster.broadcast(&event);

        let persistence = self.persistence.clone();
        let line = serde_json::to_string(&event)
            .unwrap_or_else(|_| "{}".to_string());
        let snapshot = Some(self.snapshot_metrics_locked());
        tokio::spawn(async move {
            persist_and_snapshot(persistence, PersistStream::Events, line, snapshot).await;
        });

        Ok(RecordOutcome::Recorded(event))
    }

    /// `recordChainOfThought`. Content is redacted (or hashed away entirely
    /// in strict mode) before it ever enters the ring.
    pub fn record_chain_of_thought(&self, input: CotInput) -> ObserverResult<RecordOutcome<CotEntry>> {
        let pending = self.persistence.pending_writes.load(Ordering::SeqCst);
        let extreme_threshold = self.config.max_queue_size + self.config.max_queue_size / 2;
        if pending >= extreme_threshold && input.phase.droppable_under_extreme_backpressure() {
            self.backpressure_events.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(phase = ?input.phase, "dropping chain-of-thought entry under extreme backpressure");
            return Ok(RecordOutcome::Dropped);
        }

        let redacted = self.redactor.redact_text(&input.content);

        let entry = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let entry = CotEntry {
                seq,
                schema_version: SCHEMA_VERSION,
                source_version: SOURCE_VERSION.to_string(),
                id: input.id,
                task_id: input.task_id.clone(),
                agent_id: input.agent_id.clone(),
                phase: input.phase,
                content: redacted.text,
                timestamp: input.timestamp,
                confidence: input.confidence,
                redacted: redacted.redacted,
                hash: redacted.hash,
            };

            if inner.cot.len() >= RING_CAPACITY {
                inner.cot.pop_front();
            }
            inner.cot.push_back(entry.clone());
            inner
                .counters
                .record_cot(entry.phase, entry.task_id.as_deref(), entry.agent_id.as_deref());

            entry
        };

        self.persistence.pending_writes.fetch_add(1, Ordering::SeqCst);

        let persistence = self.persistence.clone();
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
        let snapshot = Some(self.snapshot_metrics_locked());
        tokio::spawn(async move {
            persist_and_snapshot(persistence, PersistStream::Cot, line, snapshot).await;
        });

        Ok(RecordOutcome::Recorded(entry))
    }

    fn snapshot_metrics_locked(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let active = inner.task_state.active_count();
        let queued = inner.task_state.queued_count();
        drop(inner);
        self.metrics_snapshot(active, queued)
    }

    fn metrics_snapshot(&self, active_tasks: u64, queued_tasks: u64) -> MetricsSnapshot {
        let inner = self.inner.lock();
        inner.counters.snapshot(
            active_tasks,
            queued_tasks,
            self.persistence.pending_writes.load(Ordering::SeqCst),
            self.persistence.degraded.load(Ordering::SeqCst),
        )
    }

    /// `getMetrics`, served by `GET /observer/metrics`.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let (active, queued) = {
            let inner = self.inner.lock();
            (inner.task_state.active_count(), inner.task_state.queued_count())
        };
        self.metrics_snapshot(active, queued)
    }

    /// `getStatus`, served by `GET /observer/status`.
    pub fn get_status(&self, runtime_running: Option<bool>) -> StatusSummary {
        let degraded = self.persistence.degraded.load(Ordering::SeqCst);
        let status = counters::status_from(
            runtime_running.unwrap_or(false),
            degraded,
            self.config.standalone,
            runtime_running.is_some(),
        );
        let uptime_ms = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;
        StatusSummary {
            status,
            started_at: self.started_at,
            uptime_ms,
            queue_depth: self.persistence.pending_writes.load(Ordering::SeqCst),
            max_queue_size: self.config.max_queue_size,
            observer_degraded: degraded,
            last_flush_ms: *self.persistence.last_flush_ms.lock(),
            active_file: Some(self.persistence.events_writer.active_file()),
            backpressure_events: self.backpressure_events.load(Ordering::SeqCst),
            auth_configured: self.config.auth_token.is_some(),
        }
    }

    /// `getProgress`, served by `GET /observer/progress`.
    pub fn get_progress(&self, runtime_running: Option<bool>) -> ProgressSummary {
        let degraded = self.persistence.degraded.load(Ordering::SeqCst);
        let status = counters::status_from(
            runtime_running.unwrap_or(false),
            degraded,
            self.config.standalone,
            runtime_running.is_some(),
        );
        let inner = self.inner.lock();
        let reasoning_steps = inner.counters.reasoning_categories.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let total_reasoning_steps = inner.counters.total_reasoning_steps();
        drop(inner);
        let uptime_minutes = (Utc::now() - self.started_at).num_seconds().max(0) as f64 / 60.0;
        ProgressSummary {
            status,
            reasoning_steps,
            total_reasoning_steps,
            uptime_minutes,
        }
    }

    /// `getTask`. Combines ring-derived events/CoT with the ring-derived
    /// lifecycle state; the HTTP layer may overlay a runtime controller's
    /// view on top when one is configured.
    pub fn get_task(&self, task_id: &str) -> ObserverResult<TaskView> {
        let inner = self.inner.lock();
        let events: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect();
        let cot_entries: Vec<CotEntry> = inner
            .cot
            .iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect();
        let state = inner.task_state.view_state_for(task_id);
        drop(inner);

        let state = state.ok_or_else(|| NotFoundError::Task(task_id.to_string()))?;
        Ok(TaskView {
            task_id: task_id.to_string(),
            state,
            events,
            cot_entries,
        })
    }

    /// `listEvents`. Cursor-paginated, ascending by `seq`. `limit = 0`
    /// returns an empty page and the current tail cursor rather than
    /// clamping up to the default; `since > until` returns empty with no
    /// error.
    pub fn list_events(&self, query: ListEventsQuery) -> ObserverResult<ListEventsResult> {
        let inner = self.inner.lock();
        let tail_cursor = inner.events.back().map(|e| encode_cursor(e.seq));

        if query.limit == Some(0) {
            return Ok(ListEventsResult {
                events: Vec::new(),
                next_cursor: tail_cursor,
            });
        }
        if let (Some(since), Some(until)) = (query.since, query.until) {
            if since > until {
                return Ok(ListEventsResult {
                    events: Vec::new(),
                    next_cursor: tail_cursor,
                });
            }
        }

        let limit = clamp_limit(query.limit, EVENTS_DEFAULT_LIMIT, EVENTS_MAX_LIMIT);
        let after_seq = query.cursor.as_deref().and_then(decode_cursor);

        let mut matched: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| after_seq.map(|s| e.seq > s).unwrap_or(true))
            .filter(|e| query.since.map(|s| e.timestamp >= s).unwrap_or(true))
            .filter(|e| query.until.map(|u| e.timestamp <= u).unwrap_or(true))
            .filter(|e| query.task_id.as_deref().map(|t| e.task_id.as_deref() == Some(t)).unwrap_or(true))
            .filter(|e| query.event_type.as_deref().map(|t| e.event_type == t).unwrap_or(true))
            .filter(|e| query.severity.map(|s| e.severity == s).unwrap_or(true))
            .cloned()
            .collect();
        drop(inner);

        matched.truncate(limit as usize);
        let next_cursor = matched.last().map(|e| encode_cursor(e.seq)).or(tail_cursor);

        Ok(ListEventsResult {
            events: matched,
            next_cursor,
        })
    }

    /// `listChainOfThought`.
    pub fn list_chain_of_thought(&self, query: ListCotQuery) -> ObserverResult<ListCotResult> {
        let inner = self.inner.lock();
        let tail_cursor = inner.cot.back().map(|e| encode_cursor(e.seq));

        if query.limit == Some(0) {
            return Ok(ListCotResult {
                entries: Vec::new(),
                next_cursor: tail_cursor,
            });
        }
        if let (Some(since), Some(until)) = (query.since, query.until) {
            if since > until {
                return Ok(ListCotResult {
                    entries: Vec::new(),
                    next_cursor: tail_cursor,
                });
            }
        }

        let limit = clamp_limit(query.limit, COT_DEFAULT_LIMIT, COT_MAX_LIMIT);
        let after_seq = query.cursor.as_deref().and_then(decode_cursor);

        let mut matched: Vec<CotEntry> = inner
            .cot
            .iter()
            .filter(|e| after_seq.map(|s| e.seq > s).unwrap_or(true))
            .filter(|e| query.since.map(|s| e.timestamp >= s).unwrap_or(true))
            .filter(|e| query.until.map(|u| e.timestamp <= u).unwrap_or(true))
            .filter(|e| query.task_id.as_deref().map(|t| e.task_id.as_deref() == Some(t)).unwrap_or(true))
            .filter(|e| query.phase.map(|p| e.phase == p).unwrap_or(true))
            .cloned()
            .collect();
        drop(inner);

        matched.truncate(limit as usize);
        let next_cursor = matched.last().map(|e| encode_cursor(e.seq)).or(tail_cursor);

        Ok(ListCotResult {
            entries: matched,
            next_cursor,
        })
    }

    /// `POST /observer/observations`: a lightweight note recorded as an
    /// observation-phase CoT entry.
    pub fn record_observation(
        &self,
        message: String,
        task_id: Option<String>,
        author: Option<String>,
    ) -> ObserverResult<RecordOutcome<CotEntry>> {
        self.record_chain_of_thought(CotInput {
            id: uuid::Uuid::new_v4(),
            task_id,
            agent_id: author,
            phase: Phase::Observation,
            content: message,
            timestamp: Utc::now(),
            confidence: None,
        })
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Drain both persistence streams on shutdown.
    pub async fn shutdown(self) {
        let grace = std::time::Duration::from_millis(self.config.shutdown_grace_ms);
        self.broadcaster.shutdown();
        // `persistence` may still be referenced by in-flight spawned tasks;
        // those finish independently. We only own the writer handles here
        // once every Arc clone created by in-flight writes has dropped.
        if let Ok(persistence) = Arc::try_unwrap(self.persistence) {
            tokio::join!(
                persistence.events_writer.close(grace),
                persistence.cot_writer.close(grace),
            );
        }
    }
}

enum PersistStream {
    Events,
    Cot,
}

async fn persist_and_snapshot(
    persistence: Arc<Persistence>,
    stream: PersistStream,
    line: String,
    metrics_for_snapshot: Option<MetricsSnapshot>,
) {
    let writer = match stream {
        PersistStream::Events => &persistence.events_writer,
        PersistStream::Cot => &persistence.cot_writer,
    };

    match writer.append(line).await {
        Ok(()) => {
            *persistence.last_flush_ms.lock() = Some(Utc::now().timestamp_millis() as u64);
            if let Some(snapshot) = metrics_for_snapshot {
                if let Err(e) = persistence.metrics_writer.write(&snapshot).await {
                    tracing::warn!("failed to write metrics snapshot: {e}");
                }
            }
        }
        Err(e) => {
            tracing::error!("persistence append failed: {e}");
            persistence.degraded.store(true, Ordering::SeqCst);
        }
    }

    persistence.pending_writes.fetch_sub(1, Ordering::SeqCst);
}

fn clamp_limit(requested: Option<u64>, default: u64, max: u64) -> u64 {
    requested.map(|l| l.clamp(1, max)).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventInput, Severity};

    fn test_store() -> (IngestStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ObserverConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.max_queue_size = 2;
        let broadcaster = Arc::new(Broadcaster::new(16));
        (IngestStore::new(config, broadcaster).unwrap(), dir)
    }

    #[tokio::test]
    async fn records_event_and_assigns_monotonic_seq() {
        let (store, _dir) = test_store();
        let e1 = store
            .record_event(EventInput::new("task.submitted", Severity::Info, "test"))
            .unwrap();
        let e2 = store
            .record_event(EventInput::new("task.assigned", Severity::Info, "test"))
            .unwrap();

        match (e1, e2) {
            (RecordOutcome::Recorded(a), RecordOutcome::Recorded(b)) => {
                assert_eq!(a.seq, 1);
                assert_eq!(b.seq, 2);
            }
            _ => panic!("expected both recorded"),
        }
    }

    #[tokio::test]
    async fn list_events_paginates_with_cursor() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            store
                .record_event(EventInput::new(format!("evt.{i}"), Severity::Info, "test"))
                .unwrap();
        }

        let first = store
            .list_events(ListEventsQuery {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.events[0].seq, 1);

        let second = store
            .list_events(ListEventsQuery {
                cursor: first.next_cursor,
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second.events[0].seq, 3);
    }

    #[tokio::test]
    async fn get_task_returns_not_found_for_unknown_task() {
        let (store, _dir) = test_store();
        let err = store.get_task("missing").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn debug_events_drop_once_queue_is_saturated() {
        let (store, _dir) = test_store();
        // max_queue_size = 2, and pending_writes only decrements once the
        // spawned persist task runs, so two rapid debug submissions can
        // legitimately race the writer; assert on the backpressure counter
        // behavior instead of exact pending count.
        let mut dropped_any = false;
        for _ in 0..20 {
            let outcome = store
                .record_event(EventInput::new("noise", Severity::Debug, "test"))
                .unwrap();
            if matches!(outcome, RecordOutcome::Dropped) {
                dropped_any = true;
                break;
            }
        }
        assert!(dropped_any, "expected at least one debug event to be dropped under backpressure");
    }
}
