use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weave_core::types::{Plan, PlanId, PlanStatus, SkipReason, TaskError, TaskResult, TaskStatus};

use crate::graph::ExecutionReport;

/// Per-task entry in a collaboration response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&TaskResult> for TaskOutcome {
    fn from(r: &TaskResult) -> Self {
        Self {
            status: r.status,
            content: r.output.as_ref().map(|o| o.content.clone()),
            confidence: r.output.as_ref().and_then(|o| o.confidence),
            error: r.error.clone(),
            skip_reason: r.skip_reason,
            service: r.service.clone(),
            attempts: r.attempts,
            started_at: r.started_at,
            finished_at: r.finished_at,
        }
    }
}

/// Final response for one executed plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationResponse {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub results: BTreeMap<String, TaskOutcome>,
    pub summary: String,
    pub execution_time_ms: u64,
    /// Services actually invoked, first use first.
    pub services_used: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    #[serde(default)]
    pub deadline_exceeded: bool,
}

/// Overall status from per-task results.
///
/// `Completed` when every task succeeded, `Failed` when none did, otherwise
/// `CompletedWithErrors`.
pub fn overall_status(results: &[TaskResult]) -> PlanStatus {
    let succeeded = results
        .iter()
        .filter(|r| r.status == TaskStatus::Succeeded)
        .count();
    if !results.is_empty() && succeeded == results.len() {
        PlanStatus::Completed
    } else if succeeded == 0 {
        PlanStatus::Failed
    } else {
        PlanStatus::CompletedWithErrors
    }
}

fn summary(total: usize, unsuccessful: usize) -> String {
    if unsuccessful == 0 {
        format!("Collaboration completed successfully with {} tasks", total)
    } else {
        format!(
            "Collaboration completed with {} of {} tasks failed",
            unsuccessful, total
        )
    }
}

/// Merge per-task results into the response document.
///
/// Results are read in the plan's `task_sequence` order, which fixes the
/// order of `services_used` and the id lists.
pub fn aggregate(plan: &Plan, results: &[TaskResult], execution_time_ms: u64) -> CollaborationResponse {
    let by_id: BTreeMap<&str, &TaskResult> =
        results.iter().map(|r| (r.task_id.as_str(), r)).collect();

    let mut services_used: Vec<String> = Vec::new();
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut skipped = Vec::new();

    for id in &plan.task_sequence {
        let Some(result) = by_id.get(id.as_str()) else {
            continue;
        };
        match result.status {
            TaskStatus::Succeeded => completed.push(id.clone()),
            TaskStatus::Failed => failed.push(id.clone()),
            TaskStatus::Skipped => skipped.push(id.clone()),
            _ => {}
        }
        if result.attempts > 0 {
            if let Some(service) = &result.service {
                if !services_used.contains(service) {
                    services_used.push(service.clone());
                }
            }
        }
    }

    let total = results.len();
    CollaborationResponse {
        plan_id: plan.id.clone(),
        status: overall_status(results),
        results: results
            .iter()
            .map(|r| (r.task_id.clone(), TaskOutcome::from(r)))
            .collect(),
        summary: summary(total, total - completed.len()),
        execution_time_ms,
        services_used,
        completed,
        failed,
        skipped,
        deadline_exceeded: false,
    }
}

impl From<&ExecutionReport> for CollaborationResponse {
    fn from(report: &ExecutionReport) -> Self {
        let mut response = aggregate(
            &report.plan,
            &report.results,
            report.elapsed.as_millis() as u64,
        );
        response.deadline_exceeded = report.deadline_exceeded;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::error::ErrorCode;
    use weave_core::types::{PlanContext, ServiceOutput, TaskNode, TaskSpec, TaskType};

    fn plan(ids: &[&str]) -> Plan {
        let nodes: Vec<TaskNode> = ids
            .iter()
            .map(|id| TaskNode::new(*id, TaskSpec::new(TaskType::General), "p"))
            .collect();
        Plan {
            id: PlanId::new(),
            prompt: "p".into(),
            template: "custom".into(),
            task_sequence: ids.iter().map(|s| s.to_string()).collect(),
            tasks: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            context: PlanContext::default(),
            estimated_duration_secs: 0,
            created_at: Utc::now(),
            status: PlanStatus::Running,
        }
    }

    fn ok(id: &str, service: &str) -> TaskResult {
        TaskResult::succeeded(
            id,
            service,
            ServiceOutput::text(format!("{} output", id)).with_confidence(0.8),
            Utc::now(),
            1,
        )
    }

    #[test]
    fn test_all_succeeded() {
        let p = plan(&["a", "b", "c"]);
        let results = vec![ok("a", "s1"), ok("b", "s2"), ok("c", "s1")];
        let resp = aggregate(&p, &results, 42);

        assert_eq!(resp.status, PlanStatus::Completed);
        assert_eq!(resp.summary, "Collaboration completed successfully with 3 tasks");
        assert_eq!(resp.services_used, vec!["s1", "s2"]);
        assert_eq!(resp.results["b"].content.as_deref(), Some("b output"));
        assert_eq!(resp.results["b"].confidence, Some(0.8));
        assert_eq!(resp.execution_time_ms, 42);
    }

    #[test]
    fn test_partial_failure() {
        let p = plan(&["a", "b", "c"]);
        let results = vec![
            ok("a", "s1"),
            TaskResult::failed(
                "b",
                None,
                ErrorCode::ServiceUnavailable,
                "no service",
                Utc::now(),
                0,
            ),
            TaskResult::skipped("c", SkipReason::UpstreamFailure, "b failed"),
        ];
        let resp = aggregate(&p, &results, 0);

        assert_eq!(resp.status, PlanStatus::CompletedWithErrors);
        assert_eq!(resp.summary, "Collaboration completed with 2 of 3 tasks failed");
        assert_eq!(resp.completed, vec!["a"]);
        assert_eq!(resp.failed, vec!["b"]);
        assert_eq!(resp.skipped, vec!["c"]);
        assert_eq!(resp.services_used, vec!["s1"]);
        assert_eq!(
            resp.results["c"].skip_reason,
            Some(SkipReason::UpstreamFailure)
        );
    }

    #[test]
    fn test_nothing_succeeded_is_failed() {
        let results = vec![TaskResult::failed(
            "a",
            Some("s1".into()),
            ErrorCode::ExecutionTimeout,
            "timed out",
            Utc::now(),
            4,
        )];
        assert_eq!(overall_status(&results), PlanStatus::Failed);
        assert_eq!(overall_status(&[]), PlanStatus::Failed);
    }

    #[test]
    fn test_wire_shape() {
        let p = plan(&["a"]);
        let resp = aggregate(&p, &[ok("a", "s1")], 5);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["results"]["a"]["status"], "SUCCEEDED");
        assert!(json["results"]["a"].get("error").is_none());
    }
}
