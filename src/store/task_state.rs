//! Task state reconstruction from the event stream.

use std::collections::HashMap;

use crate::types::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DerivedState {
    Queued,
    Assigned,
    Terminal(TerminalState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalState {
    Completed,
    Failed,
}

/// Per-task state machine fed by event type.
#[derive(Debug, Default)]
pub struct TaskStateMachine {
    states: HashMap<String, DerivedState>,
}

impl TaskStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event's `(type, taskId)` into the state machine.
    pub fn apply(&mut self, event_type: &str, task_id: Option<&str>) {
        let Some(task_id) = task_id else { return };
        match event_type {
            "task.submitted" => {
                self.states.insert(task_id.to_string(), DerivedState::Queued);
            }
            "task.assigned" => {
                self.states
                    .insert(task_id.to_string(), DerivedState::Assigned);
            }
            "task.completed" => {
                self.states.insert(
                    task_id.to_string(),
                    DerivedState::Terminal(TerminalState::Completed),
                );
            }
            "task.failed" => {
                self.states.insert(
                    task_id.to_string(),
                    DerivedState::Terminal(TerminalState::Failed),
                );
            }
            _ => {}
        }
    }

    /// Raw derived state, distinguishing `queued` from `assigned` — used by
    /// the active/queued aggregate counts.
    pub fn state_for(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).map(|s| match s {
            DerivedState::Queued => TaskState::Queued,
            DerivedState::Assigned => TaskState::Assigned,
            DerivedState::Terminal(TerminalState::Completed) => TaskState::Completed,
            DerivedState::Terminal(TerminalState::Failed) => TaskState::Failed,
        })
    }

    /// Task view state: completed/failed explicitly, any other known state
    /// folded into `running`.
    pub fn view_state_for(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).map(|s| match s {
            DerivedState::Queued | DerivedState::Assigned => TaskState::Running,
            DerivedState::Terminal(TerminalState::Completed) => TaskState::Completed,
            DerivedState::Terminal(TerminalState::Failed) => TaskState::Failed,
        })
    }

    /// Number of tasks in non-terminal states.
    pub fn active_count(&self) -> u64 {
        self.states
            .values()
            .filter(|s| !matches!(s, DerivedState::Terminal(_)))
            .count() as u64
    }

    /// Number of tasks whose last state is `queued`.
    pub fn queued_count(&self) -> u64 {
        self.states
            .values()
            .filter(|s| matches!(s, DerivedState::Queued))
            .count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_lifecycle_transitions() {
        let mut m = TaskStateMachine::new();
        m.apply("task.submitted", Some("T1"));
        assert_eq!(m.state_for("T1"), Some(TaskState::Queued));
        assert_eq!(m.active_count(), 1);
        assert_eq!(m.queued_count(), 1);

        m.apply("task.assigned", Some("T1"));
        assert_eq!(m.state_for("T1"), Some(TaskState::Assigned));
        assert_eq!(m.active_count(), 1);
        assert_eq!(m.queued_count(), 0);

        m.apply("task.completed", Some("T1"));
        assert_eq!(m.state_for("T1"), Some(TaskState::Completed));
        assert_eq!(m.active_count(), 0);
    }

    #[test]
    fn view_state_folds_queued_and_assigned_into_running() {
        let mut m = TaskStateMachine::new();
        m.apply("task.submitted", Some("T1"));
        assert_eq!(m.view_state_for("T1"), Some(TaskState::Running));

        m.apply("task.assigned", Some("T1"));
        assert_eq!(m.view_state_for("T1"), Some(TaskState::Running));

        m.apply("task.completed", Some("T1"));
        assert_eq!(m.view_state_for("T1"), Some(TaskState::Completed));
    }

    #[test]
    fn ignores_events_without_task_id() {
        let mut m = TaskStateMachine::new();
        m.apply("task.submitted", None);
        assert_eq!(m.active_count(), 0);
    }
}
