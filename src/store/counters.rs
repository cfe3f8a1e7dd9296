//! Derived counters, updated on every accepted record, and the metrics
//! snapshot computed from them.

use std::collections::{HashMap, HashSet};

use crate::types::{MetricsSnapshot, ObserverStatus, Phase};

#[derive(Debug, Default)]
pub struct Counters {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub policy_violations: u64,
    pub aggregate_budget_debit: f64,
    pub aggregate_budget_limit: f64,
    pub reasoning_categories: HashMap<&'static str, u64>,
    /// taskId -> CoT count (reasoning depth).
    pub task_depth: HashMap<String, u64>,
    /// taskId -> distinct agentId set (debate breadth).
    pub task_breadth: HashMap<String, HashSet<String>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a completed/failed task event.
    pub fn record_task_outcome(&mut self, event_type: &str, metadata: &serde_json::Value) {
        match event_type {
            "task.completed" => {
                self.total_tasks += 1;
                let success = metadata
                    .get("success")
                    .map(|v| v != &serde_json::Value::Bool(false))
                    .unwrap_or(true);
                if success {
                    self.successful_tasks += 1;
                }
            }
            "task.failed" => {
                self.total_tasks += 1;
            }
            _ => {}
        }
    }

    /// Apply a policy-violation-bearing event.
    pub fn record_policy_event(&mut self, event_type: &str, metadata: &serde_json::Value) {
        match event_type {
            "policy.caws.violation" => {
                self.policy_violations += 1;
            }
            "caws.validation" => {
                let passed = metadata.get("passed").and_then(|v| v.as_bool());
                let verdict = metadata.get("verdict").and_then(|v| v.as_str());
                if passed == Some(false)
                    || matches!(verdict, Some("fail") | Some("waiver-required"))
                {
                    self.policy_violations += 1;
                }
            }
            "caws.compliance" => {
                let verdict = metadata.get("verdict").and_then(|v| v.as_str());
                if matches!(
                    verdict,
                    Some("verified_false") | Some("contradictory") | Some("error")
                ) {
                    self.policy_violations += 1;
                }
            }
            _ => {}
        }
    }

    /// Apply a `budget.*` event.
    pub fn record_budget_event(&mut self, event_type: &str, metadata: &serde_json::Value) {
        if !event_type.starts_with("budget.") {
            return;
        }
        if let Some(debit) = metadata.get("debit").and_then(|v| v.as_f64()) {
            self.aggregate_budget_debit += debit;
        }
        if let Some(limit) = metadata.get("limit").and_then(|v| v.as_f64()) {
            self.aggregate_budget_limit += limit;
        }
    }

    /// Apply a CoT entry's phase/task/agent into the reasoning counters.
    pub fn record_cot(&mut self, phase: Phase, task_id: Option<&str>, agent_id: Option<&str>) {
        *self.reasoning_categories.entry(phase.category()).or_insert(0) += 1;
        if let Some(task_id) = task_id {
            *self.task_depth.entry(task_id.to_string()).or_insert(0) += 1;
            if let Some(agent_id) = agent_id {
                self.task_breadth
                    .entry(task_id.to_string())
                    .or_default()
                    .insert(agent_id.to_string());
            }
        }
    }

    pub fn total_reasoning_steps(&self) -> u64 {
        self.reasoning_categories.values().sum()
    }

    /// Build a metrics snapshot as a pure function of counter state, plus
    /// task-state-derived active/queued counts. `observer_degraded`/
    /// `queue_depth` come from the store.
    pub fn snapshot(
        &self,
        active_tasks: u64,
        queued_tasks: u64,
        queue_depth: u64,
        observer_degraded: bool,
    ) -> MetricsSnapshot {
        let depths: Vec<u64> = self.task_depth.values().copied().collect();
        let reasoning_depth_avg = mean_u64(&depths);
        let reasoning_depth_p95 = p95_u64(&depths);

        let breadths: Vec<u64> = self.task_breadth.values().map(|s| s.len() as u64).collect();
        let debate_breadth_avg = mean_u64(&breadths);

        let task_success_rate = if self.total_tasks == 0 {
            0.0
        } else {
            self.successful_tasks as f64 / self.total_tasks as f64
        };

        let tool_budget_utilization = if self.aggregate_budget_limit == 0.0 {
            0.0
        } else {
            self.aggregate_budget_debit / self.aggregate_budget_limit
        };

        MetricsSnapshot {
            reasoning_depth_avg,
            reasoning_depth_p95,
            debate_breadth_avg,
            task_success_rate,
            tool_budget_utilization,
            active_tasks,
            queued_tasks,
            policy_violations: self.policy_violations,
            queue_depth,
            observer_degraded,
            timestamp: chrono::Utc::now(),
        }
    }
}

fn mean_u64(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

/// `sort(values)[floor(0.95 * n)]` with an `n-1` clamp.
fn p95_u64(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((0.95 * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[idx] as f64
}

pub fn status_from(running: bool, degraded: bool, standalone: bool, has_controller: bool) -> ObserverStatus {
    if degraded {
        return ObserverStatus::Degraded;
    }
    if !has_controller {
        return if standalone {
            ObserverStatus::Running
        } else {
            ObserverStatus::Stopped
        };
    }
    if running {
        ObserverStatus::Running
    } else {
        ObserverStatus::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_success_rate_is_zero_when_no_tasks() {
        let c = Counters::new();
        let snap = c.snapshot(0, 0, 0, false);
        assert_eq!(snap.task_success_rate, 0.0);
    }

    #[test]
    fn success_defaults_true_unless_explicitly_false() {
        let mut c = Counters::new();
        c.record_task_outcome("task.completed", &json!({}));
        c.record_task_outcome("task.completed", &json!({"success": false}));
        assert_eq!(c.total_tasks, 2);
        assert_eq!(c.successful_tasks, 1);
        assert_eq!(c.snapshot(0, 0, 0, false).task_success_rate, 0.5);
    }

    #[test]
    fn budget_utilization_zero_when_no_limit() {
        let mut c = Counters::new();
        c.record_budget_event("budget.debit", &json!({"debit": 10.0}));
        assert_eq!(c.snapshot(0, 0, 0, false).tool_budget_utilization, 0.0);

        c.record_budget_event("budget.limit", &json!({"limit": 100.0}));
        assert_eq!(c.snapshot(0, 0, 0, false).tool_budget_utilization, 0.1);
    }

    #[test]
    fn p95_matches_expected_percentile_index() {
        let values: Vec<u64> = (1..=20).collect();
        assert_eq!(p95_u64(&values), 20.0);
    }

    #[test]
    fn metrics_snapshot_is_pure_function_of_counters() {
        let mut c = Counters::new();
        c.record_cot(Phase::Analysis, Some("T"), Some("A1"));
        let a = c.snapshot(1, 0, 0, false);
        let b = c.snapshot(1, 0, 0, false);
        assert_eq!(a.reasoning_depth_avg, b.reasoning_depth_avg);
        assert_eq!(a.debate_breadth_avg, b.debate_breadth_avg);
    }
}
