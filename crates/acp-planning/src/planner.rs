//! Task decomposition into an execution plan

use acp_core::policy::clamp_int;
use acp_core::{ExecutionPlan, PlanEdge, PlanNode, Priority, RiskProfile, Task, TaskSpec};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::stages::STAGES;

/// Fallback parallelism when neither the task nor the options give one
pub const DEFAULT_PARALLELISM: i64 = 8;

/// The task fields the planner reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub goal: String,
    pub repo: String,
    pub branch: String,
    pub acceptance_criteria: Vec<String>,
    pub priority: Priority,
    pub risk_profile: RiskProfile,
    pub parallelism_limit: Option<i64>,
}

impl From<&Task> for PlanRequest {
    fn from(task: &Task) -> Self {
        Self {
            goal: task.goal.clone(),
            repo: task.repo.clone(),
            branch: task.branch.clone(),
            acceptance_criteria: task.acceptance_criteria.clone(),
            priority: task.priority,
            risk_profile: task.risk_profile,
            parallelism_limit: Some(i64::from(task.parallelism_limit)),
        }
    }
}

impl From<&TaskSpec> for PlanRequest {
    fn from(spec: &TaskSpec) -> Self {
        Self {
            goal: spec.goal.trim().to_string(),
            repo: spec.repo.trim().to_string(),
            branch: spec
                .branch
                .clone()
                .unwrap_or_else(|| acp_core::DEFAULT_BRANCH.to_string()),
            acceptance_criteria: spec.normalized_criteria(),
            priority: Priority::normalize(spec.priority.as_deref()),
            risk_profile: RiskProfile::normalize(spec.risk_profile.as_deref()),
            parallelism_limit: spec.parallelism_limit,
        }
    }
}

/// Planner knobs supplied by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlannerOptions {
    /// Fallback parallelism for requests without one
    pub parallelism_limit: Option<i64>,
}

/// Build the standard four-stage plan for a task.
///
/// Nodes are always `coding -> testing -> reviewing -> releasing`. Each node
/// payload carries the task description plus a `stage` tag so a worker can
/// act on the job without reading the task.
pub fn build_execution_plan(request: &PlanRequest, opts: &PlannerOptions) -> ExecutionPlan {
    let fallback = clamp_int(opts.parallelism_limit, 1, 10, DEFAULT_PARALLELISM);
    let parallelism_limit = clamp_int(request.parallelism_limit, 1, 10, fallback) as u32;

    let nodes = STAGES
        .iter()
        .map(|stage| PlanNode {
            node_id: stage.node_id.to_string(),
            role: stage.role.to_string(),
            timeout_s: stage.timeout_s,
            max_retries: stage.max_retries,
            depends_on: stage.after.iter().map(|dep| dep.to_string()).collect(),
            payload: json!({
                "goal": request.goal,
                "repo": request.repo,
                "branch": request.branch,
                "acceptance_criteria": request.acceptance_criteria,
                "priority": request.priority,
                "risk_profile": request.risk_profile,
                "stage": stage.node_id,
            }),
        })
        .collect();

    let edges = STAGES
        .iter()
        .filter_map(|stage| {
            stage.after.map(|from| PlanEdge {
                from: from.to_string(),
                to: stage.node_id.to_string(),
            })
        })
        .collect();

    ExecutionPlan {
        parallelism_limit,
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PlanRequest {
        PlanRequest {
            goal: "Add retry to uploader".into(),
            repo: "org/uploader".into(),
            branch: "main".into(),
            acceptance_criteria: vec!["retries 3 times".into()],
            priority: Priority::P0,
            risk_profile: RiskProfile::High,
            parallelism_limit: None,
        }
    }

    #[test]
    fn test_node_order_and_roles() {
        let plan = build_execution_plan(&request(), &PlannerOptions::default());
        let ids: Vec<_> = plan.nodes.iter().map(|n| n.node_id.as_str()).collect();
        let roles: Vec<_> = plan.nodes.iter().map(|n| n.role.as_str()).collect();
        assert_eq!(ids, ["coding", "testing", "reviewing", "releasing"]);
        assert_eq!(roles, ["coder", "tester", "reviewer", "release"]);
    }

    #[test]
    fn test_timeouts_retries_and_dependencies() {
        let plan = build_execution_plan(&request(), &PlannerOptions::default());
        let coding = &plan.nodes[0];
        assert_eq!(coding.timeout_s, 2700);
        assert_eq!(coding.max_retries, 2);
        assert!(coding.depends_on.is_empty());

        let release = &plan.nodes[3];
        assert_eq!(release.timeout_s, 1200);
        assert_eq!(release.max_retries, 1);
        assert_eq!(release.depends_on, vec!["reviewing".to_string()]);
        assert_eq!(plan.nodes[1].depends_on, vec!["coding".to_string()]);
    }

    #[test]
    fn test_edges_are_linear() {
        let plan = build_execution_plan(&request(), &PlannerOptions::default());
        let edges: Vec<_> = plan
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(
            edges,
            [
                ("coding", "testing"),
                ("testing", "reviewing"),
                ("reviewing", "releasing")
            ]
        );
    }

    #[test]
    fn test_payload_carries_task_and_stage() {
        let plan = build_execution_plan(&request(), &PlannerOptions::default());
        let payload = &plan.nodes[2].payload;
        assert_eq!(payload["stage"], "reviewing");
        assert_eq!(payload["repo"], "org/uploader");
        assert_eq!(payload["priority"], "P0");
        assert_eq!(payload["risk_profile"], "high");
        assert_eq!(payload["acceptance_criteria"][0], "retries 3 times");
    }

    #[test]
    fn test_parallelism_resolution() {
        let mut req = request();
        let none = PlannerOptions::default();
        let four = PlannerOptions {
            parallelism_limit: Some(4),
        };

        assert_eq!(build_execution_plan(&req, &none).parallelism_limit, 8);
        assert_eq!(build_execution_plan(&req, &four).parallelism_limit, 4);

        req.parallelism_limit = Some(3);
        assert_eq!(build_execution_plan(&req, &four).parallelism_limit, 3);

        req.parallelism_limit = Some(50);
        assert_eq!(build_execution_plan(&req, &none).parallelism_limit, 10);

        req.parallelism_limit = None;
        let huge = PlannerOptions {
            parallelism_limit: Some(99),
        };
        assert_eq!(build_execution_plan(&req, &huge).parallelism_limit, 10);
    }

    #[test]
    fn test_deterministic() {
        let a = build_execution_plan(&request(), &PlannerOptions::default());
        let b = build_execution_plan(&request(), &PlannerOptions::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_request_from_spec_normalizes() {
        let mut spec = TaskSpec::new("  goal ", "repo");
        spec.priority = Some("p2".into());
        let req = PlanRequest::from(&spec);
        assert_eq!(req.goal, "goal");
        assert_eq!(req.branch, "main");
        assert_eq!(req.priority, Priority::P2);
        assert_eq!(req.risk_profile, RiskProfile::Medium);
    }
}
