//! HTTP route handlers for the Observer Core surface.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::broadcast::{Broadcaster, SseFrame};
use crate::controller::{CommandRequest, LifecycleAction, SubmitTaskRequest};
use crate::error::ObserverError;
use crate::store::{ListCotQuery, ListEventsQuery, RecordOutcome};
use crate::types::{EventInput, Severity, SubscriberFilter, TaskView};

use super::server::ApiState;
use super::types::{
    ArbiterActionResponse, CommandBody, CommandResponse, CotListResponse, CotQueryParams,
    ErrorBody, ErrorDetail, EventsListResponse, EventsQueryParams, ObservationBody,
    ObservationResponse, StreamQueryParams, SubmitTaskBody, SubmitTaskResponse,
};

/// Thin wrapper so handlers can return `Result<_, ApiError>` and rely on
/// `?`; renders the `{error: {code, message}}` envelope.
pub struct ApiError(ObserverError);

impl From<ObserverError> for ApiError {
    fn from(e: ObserverError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

fn system_event(event_type: &str, severity: Severity, task_id: Option<String>, metadata: serde_json::Value) -> EventInput {
    let mut input = EventInput::new(event_type, severity, "observer-core");
    input.task_id = task_id;
    input.metadata = metadata;
    input
}

pub async fn submit_task(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<SubmitTaskBody>,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    let req = SubmitTaskRequest {
        description: body.description,
        spec_path: body.spec_path,
        metadata: body.metadata,
    };

    match state.controller.submit_task(req).await {
        Ok(result) => {
            let _ = state.store.record_event(system_event(
                "observer.submit_task",
                Severity::Info,
                Some(result.task_id.clone()),
                serde_json::json!({"queued": result.queued}),
            ));
            Ok(Json(SubmitTaskResponse {
                task_id: result.task_id,
                assignment_id: result.assignment_id,
                queued: result.queued,
            }))
        }
        Err(e) => {
            let task_id = Uuid::new_v4().to_string();
            let _ = state.store.record_event(system_event(
                "observer.submit_task",
                Severity::Warn,
                Some(task_id.clone()),
                serde_json::json!({"queued": false, "reason": e.to_string()}),
            ));
            Ok(Json(SubmitTaskResponse {
                task_id,
                assignment_id: None,
                queued: false,
            }))
        }
    }
}

pub async fn submit_command(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CommandBody>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = body.command.clone();
    match state.controller.execute_command(CommandRequest { command }).await {
        Ok(result) => {
            let _ = state.store.record_event(system_event(
                "observer.command",
                Severity::Info,
                None,
                serde_json::json!({"command": body.command}),
            ));
            Ok(Json(CommandResponse {
                acknowledged: result.acknowledged,
                note: result.note,
            }))
        }
        Err(e) => {
            let _ = state.store.record_event(system_event(
                "observer.command",
                Severity::Error,
                None,
                serde_json::json!({"command": body.command, "reason": e.to_string()}),
            ));
            Err(ObserverError::from(e).into())
        }
    }
}

pub async fn arbiter_start(State(state): State<Arc<ApiState>>) -> Result<Json<ArbiterActionResponse>, ApiError> {
    match state.controller.start().await {
        Ok(action) => {
            let status = match action {
                LifecycleAction::Starting => "starting",
                _ => "running",
            };
            let _ = state.store.record_event(system_event(
                "observer.arbiter.start",
                Severity::Info,
                None,
                serde_json::json!({"status": status}),
            ));
            Ok(Json(ArbiterActionResponse { status: status.to_string() }))
        }
        Err(e) => {
            let _ = state.store.record_event(system_event(
                "observer.arbiter.start",
                Severity::Error,
                None,
                serde_json::json!({"reason": e.to_string()}),
            ));
            Err(ObserverError::from(e).into())
        }
    }
}

pub async fn arbiter_stop(State(state): State<Arc<ApiState>>) -> Result<Json<ArbiterActionResponse>, ApiError> {
    match state.controller.stop().await {
        Ok(action) => {
            let status = match action {
                LifecycleAction::Stopping => "stopping",
                _ => "stopped",
            };
            let _ = state.store.record_event(system_event(
                "observer.arbiter.stop",
                Severity::Info,
                None,
                serde_json::json!({"status": status}),
            ));
            Ok(Json(ArbiterActionResponse { status: status.to_string() }))
        }
        Err(e) => {
            let _ = state.store.record_event(system_event(
                "observer.arbiter.stop",
                Severity::Error,
                None,
                serde_json::json!({"reason": e.to_string()}),
            ));
            Err(ObserverError::from(e).into())
        }
    }
}

pub async fn submit_observation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ObservationBody>,
) -> Result<Json<ObservationResponse>, ApiError> {
    let outcome = state
        .store
        .record_observation(body.message, body.task_id, body.author)?;
    let response = match outcome {
        RecordOutcome::Recorded(entry) => ObservationResponse {
            id: entry.id,
            timestamp: entry.timestamp,
        },
        RecordOutcome::Dropped => ObservationResponse {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        },
    };
    Ok(Json(response))
}

pub async fn get_status(State(state): State<Arc<ApiState>>) -> Json<crate::types::StatusSummary> {
    let runtime_running = state.controller.get_status().await.ok().map(|s| s.running);
    Json(state.store.get_status(runtime_running))
}

pub async fn get_metrics(State(state): State<Arc<ApiState>>) -> Json<crate::types::MetricsSnapshot> {
    let mut snapshot = state.store.get_metrics();
    if let Ok(runtime_snapshot) = state.controller.get_metrics().await {
        // Only the runtime can see its own task scheduling; everything else
        // (reasoning depth/breadth, budget utilization, policy violations)
        // is only ever correct from this store's own counters.
        snapshot.active_tasks = runtime_snapshot.active_tasks;
        snapshot.queued_tasks = runtime_snapshot.queued_tasks;
        snapshot.task_success_rate = runtime_snapshot.task_success_rate;
    }
    Json(snapshot)
}

pub async fn get_progress(State(state): State<Arc<ApiState>>) -> Json<crate::types::ProgressSummary> {
    let runtime_running = state.controller.get_status().await.ok().map(|s| s.running);
    Json(state.store.get_progress(runtime_running))
}

pub async fn list_events(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<EventsQueryParams>,
) -> Result<Json<EventsListResponse>, ApiError> {
    let result = state.store.list_events(ListEventsQuery {
        cursor: params.cursor,
        limit: params.limit,
        since: params.since,
        until: params.until,
        task_id: params.task_id,
        event_type: params.event_type,
        severity: params.severity,
    })?;
    Ok(Json(EventsListResponse {
        events: result.events,
        next_cursor: result.next_cursor,
    }))
}

pub async fn list_chain_of_thought(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<CotQueryParams>,
) -> Result<Json<CotListResponse>, ApiError> {
    let result = state.store.list_chain_of_thought(ListCotQuery {
        cursor: params.cursor,
        limit: params.limit,
        since: params.since,
        until: params.until,
        task_id: params.task_id,
        phase: params.phase,
    })?;
    Ok(Json(CotListResponse {
        entries: result.entries,
        next_cursor: result.next_cursor,
    }))
}

pub async fn get_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let controller_snapshot = state.controller.get_task_snapshot(&task_id).await.ok().flatten();

    match state.store.get_task(&task_id) {
        Ok(mut view) => {
            if let Some(snapshot) = controller_snapshot {
                view.state = snapshot.state;
            }
            Ok(Json(view))
        }
        Err(e) => match controller_snapshot {
            Some(snapshot) => Ok(Json(TaskView {
                task_id,
                state: snapshot.state,
                events: Vec::new(),
                cot_entries: Vec::new(),
            })),
            None => Err(e.into()),
        },
    }
}

/// Wraps the subscription's receiver stream so the subscriber is removed
/// from the broadcaster as soon as the HTTP connection drops, not just on
/// the next broadcast write failure.
struct EvictOnDisconnect {
    inner: ReceiverStream<SseFrame>,
    broadcaster: Arc<Broadcaster>,
    id: Uuid,
}

impl Stream for EvictOnDisconnect {
    type Item = Result<SseEvent, std::convert::Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                Poll::Ready(Some(Ok(SseEvent::default().event(frame.event).data(frame.data))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EvictOnDisconnect {
    fn drop(&mut self) {
        self.broadcaster.remove(self.id);
    }
}

pub async fn stream_events(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<StreamQueryParams>,
) -> Response {
    let filter = SubscriberFilter {
        task_id: params.task_id,
        event_type: params.event_type,
        severity: params.severity,
    };

    let broadcaster = state.store.broadcaster();
    let subscription = broadcaster.subscribe(filter, params.verbose);
    let stream = EvictOnDisconnect {
        inner: ReceiverStream::new(subscription.rx),
        broadcaster,
        id: subscription.id,
    };

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert("cache-control", HeaderValue::from_static("no-cache, no-transform"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
