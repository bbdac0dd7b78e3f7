//! Task, plan and job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::control::SystemControls;
use crate::status::{CircuitStatus, JobStatus, Priority, RiskProfile, TaskStatus};

/// Maximum number of acceptance criteria kept on a task
pub const MAX_ACCEPTANCE_CRITERIA: usize = 60;

/// Default branch used when a task does not name one
pub const DEFAULT_BRANCH: &str = "main";

/// Generate a new task identifier
pub fn new_task_id() -> String {
    format!("task_{}", Uuid::new_v4().simple())
}

/// Generate a new job identifier
pub fn new_job_id() -> String {
    format!("job_{}", Uuid::new_v4().simple())
}

/// Task creation request as submitted by a caller
///
/// Every field except `goal` and `repo` is optional; the store normalizes
/// the rest when the task is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub risk_profile: Option<String>,
    #[serde(default)]
    pub parallelism_limit: Option<i64>,
    #[serde(default)]
    pub rollback_available: Option<bool>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    /// Extra caller metadata merged under the normalized keys
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl TaskSpec {
    pub fn new(goal: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    /// Trimmed, non-empty criteria capped at [`MAX_ACCEPTANCE_CRITERIA`]
    pub fn normalized_criteria(&self) -> Vec<String> {
        self.acceptance_criteria
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .take(MAX_ACCEPTANCE_CRITERIA)
            .map(str::to_string)
            .collect()
    }
}

/// Per-status job counts for one task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagProgress {
    pub total: u32,
    pub blocked: u32,
    pub queued: u32,
    pub dispatched: u32,
    pub claimed: u32,
    pub running: u32,
    pub completed: u32,
    pub failed: u32,
    pub timeout: u32,
    pub canceled: u32,
}

impl DagProgress {
    pub fn record(&mut self, status: JobStatus, count: u32) {
        self.total += count;
        let slot = match status {
            JobStatus::Blocked => &mut self.blocked,
            JobStatus::Queued => &mut self.queued,
            JobStatus::Dispatched => &mut self.dispatched,
            JobStatus::Claimed => &mut self.claimed,
            JobStatus::Running => &mut self.running,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Timeout => &mut self.timeout,
            JobStatus::Canceled => &mut self.canceled,
        };
        *slot += count;
    }

    pub fn from_statuses<I: IntoIterator<Item = JobStatus>>(statuses: I) -> Self {
        let mut progress = Self::default();
        for status in statuses {
            progress.record(status, 1);
        }
        progress
    }

    /// Jobs currently occupying a worker slot
    pub fn active(&self) -> u32 {
        self.dispatched + self.claimed + self.running
    }
}

/// A unit of requested work, decomposed into a job DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub goal: String,
    pub repo: String,
    pub branch: String,
    pub acceptance_criteria: Vec<String>,
    pub priority: Priority,
    pub risk_profile: RiskProfile,
    pub status: TaskStatus,
    pub parallelism_limit: u32,
    pub metadata: Value,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    #[serde(default)]
    pub dag_progress: DagProgress,
}

impl Task {
    /// Whether the release stage may be undone; absent means yes.
    pub fn rollback_available(&self) -> bool {
        self.metadata
            .get("rollback_available")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// One node of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub node_id: String,
    pub role: String,
    pub timeout_s: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Informational edge between two plan nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub from: String,
    pub to: String,
}

/// The job DAG attached to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub parallelism_limit: u32,
    pub nodes: Vec<PlanNode>,
    #[serde(default)]
    pub edges: Vec<PlanEdge>,
}

/// One plan node instantiated for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub task_id: String,
    pub node_id: String,
    pub role: String,
    pub payload: Value,
    pub timeout_s: u64,
    pub max_retries: u32,
    pub attempt: u32,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub depends_on: Vec<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub artifacts: Value,
    pub logs: Value,
    pub metrics: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Job payload handed to a worker on claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub job_id: String,
    pub task_id: String,
    pub role: String,
    pub payload: Value,
    pub timeout_s: u64,
    pub max_retries: u32,
    pub attempt: u32,
    pub depends_on: Vec<String>,
}

impl From<&Job> for ClaimedJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            task_id: job.task_id.clone(),
            role: job.role.clone(),
            payload: job.payload.clone(),
            timeout_s: job.timeout_s,
            max_retries: job.max_retries,
            attempt: job.attempt,
            depends_on: job.depends_on.clone(),
        }
    }
}

/// Result report posted by a worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Option<Value>,
    #[serde(default)]
    pub logs: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
}

impl WorkerResult {
    pub fn new(job_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn from_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// State after a worker result has been applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResultOutcome {
    pub job: Job,
    pub task: Task,
    pub duplicate: bool,
}

/// Append-only audit entry for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: String,
    pub event_type: String,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

/// Control decision taken by the system or an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: i64,
    /// `None` for global decisions such as a circuit reset
    pub task_id: Option<String>,
    pub decision_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Record of one rollback execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub id: i64,
    pub task_id: String,
    pub trigger: String,
    pub reason: String,
    pub canceled_jobs: u32,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// The single global circuit breaker row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub scope: String,
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub threshold: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CircuitBreakerState {
    pub fn is_open(&self) -> bool {
        self.status == CircuitStatus::Open
    }
}

/// The single global emergency stop flag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyStop {
    pub active: bool,
    pub by: Option<String>,
    pub reason: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

/// Everything known about one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: Task,
    pub plan: Option<ExecutionPlan>,
    pub jobs: Vec<Job>,
    pub events: Vec<TaskEvent>,
    pub decisions: Vec<DecisionRecord>,
    pub rollbacks: Vec<RollbackRecord>,
    pub controls: SystemControls,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_criteria_normalization() {
        let mut spec = TaskSpec::new("goal", "repo");
        spec.acceptance_criteria = vec!["  a ".into(), "".into(), "   ".into(), "b".into()];
        assert_eq!(spec.normalized_criteria(), vec!["a", "b"]);

        spec.acceptance_criteria = (0..80).map(|i| format!("c{}", i)).collect();
        assert_eq!(spec.normalized_criteria().len(), MAX_ACCEPTANCE_CRITERIA);
    }

    #[test]
    fn test_dag_progress_counts() {
        let progress = DagProgress::from_statuses([
            JobStatus::Queued,
            JobStatus::Blocked,
            JobStatus::Blocked,
            JobStatus::Running,
            JobStatus::Dispatched,
        ]);
        assert_eq!(progress.total, 5);
        assert_eq!(progress.blocked, 2);
        assert_eq!(progress.queued, 1);
        assert_eq!(progress.active(), 2);
    }

    #[test]
    fn test_worker_result_deserializes_sparse_payload() {
        let result: WorkerResult =
            serde_json::from_value(json!({"job_id": "job_1", "status": "completed"})).unwrap();
        assert_eq!(result.job_id, "job_1");
        assert!(result.worker_id.is_none());
        assert!(result.artifacts.is_none());
    }

    #[test]
    fn test_ids_are_prefixed_and_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert!(a.starts_with("task_"));
        assert_ne!(a, b);
        assert!(new_job_id().starts_with("job_"));
    }
}
