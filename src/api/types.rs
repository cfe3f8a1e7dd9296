//! HTTP API request/response data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{CotEntry, Event, Phase, Severity};

#[derive(Debug, Deserialize)]
pub struct SubmitTaskBody {
    pub description: String,
    #[serde(rename = "specPath")]
    pub spec_path: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "assignmentId", skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    pub queued: bool,
}

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ArbiterActionResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ObservationBody {
    pub message: String,
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ObservationResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EventsQueryParams {
    pub cursor: Option<String>,
    pub limit: Option<u64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
    pub severity: Option<Severity>,
}

#[derive(Debug, Serialize)]
pub struct EventsListResponse {
    pub events: Vec<Event>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CotQueryParams {
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub phase: Option<Phase>,
}

#[derive(Debug, Serialize)]
pub struct CotListResponse {
    pub entries: Vec<CotEntry>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StreamQueryParams {
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}
