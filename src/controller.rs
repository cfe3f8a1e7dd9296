//! The runtime controller: the interface an external agent orchestration
//! runtime implements to receive control-surface calls.
//!
//! An `#[async_trait]` interface the HTTP layer holds as `Arc<dyn Trait>`,
//! decoupling transport from implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RuntimeUnavailableError;
use crate::types::{MetricsSnapshot, TaskState};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTaskRequest {
    pub description: String,
    #[serde(rename = "specPath")]
    pub spec_path: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitTaskResult {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "assignmentId")]
    pub assignment_id: Option<String>,
    pub queued: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub acknowledged: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum LifecycleAction {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Runtime-reported status, used to override ring-derived values when
/// reachable.
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub running: bool,
    pub active_tasks: Option<u64>,
    pub queued_tasks: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RuntimeTaskSnapshot {
    pub task_id: String,
    pub state: TaskState,
    pub detail: Option<Value>,
}

/// The six operations Observer Core delegates to the orchestrator runtime.
#[async_trait]
pub trait RuntimeController: Send + Sync {
    async fn start(&self) -> Result<LifecycleAction, RuntimeUnavailableError>;
    async fn stop(&self) -> Result<LifecycleAction, RuntimeUnavailableError>;
    async fn submit_task(
        &self,
        req: SubmitTaskRequest,
    ) -> Result<SubmitTaskResult, RuntimeUnavailableError>;
    async fn execute_command(
        &self,
        req: CommandRequest,
    ) -> Result<CommandResult, RuntimeUnavailableError>;
    async fn get_status(&self) -> Result<RuntimeStatus, RuntimeUnavailableError>;
    async fn get_metrics(&self) -> Result<MetricsSnapshot, RuntimeUnavailableError>;
    async fn get_task_snapshot(
        &self,
        task_id: &str,
    ) -> Result<Option<RuntimeTaskSnapshot>, RuntimeUnavailableError>;
}

/// Used when no runtime controller is configured — every call reports
/// unavailable.
pub struct NullRuntimeController;

#[async_trait]
impl RuntimeController for NullRuntimeController {
    async fn start(&self) -> Result<LifecycleAction, RuntimeUnavailableError> {
        Err(RuntimeUnavailableError::NotConfigured)
    }
    async fn stop(&self) -> Result<LifecycleAction, RuntimeUnavailableError> {
        Err(RuntimeUnavailableError::NotConfigured)
    }
    async fn submit_task(
        &self,
        _req: SubmitTaskRequest,
    ) -> Result<SubmitTaskResult, RuntimeUnavailableError> {
        Err(RuntimeUnavailableError::NotConfigured)
    }
    async fn execute_command(
        &self,
        _req: CommandRequest,
    ) -> Result<CommandResult, RuntimeUnavailableError> {
        Err(RuntimeUnavailableError::NotConfigured)
    }
    async fn get_status(&self) -> Result<RuntimeStatus, RuntimeUnavailableError> {
        Err(RuntimeUnavailableError::NotConfigured)
    }
    async fn get_metrics(&self) -> Result<MetricsSnapshot, RuntimeUnavailableError> {
        Err(RuntimeUnavailableError::NotConfigured)
    }
    async fn get_task_snapshot(
        &self,
        _task_id: &str,
    ) -> Result<Option<RuntimeTaskSnapshot>, RuntimeUnavailableError> {
        Err(RuntimeUnavailableError::NotConfigured)
    }
}
