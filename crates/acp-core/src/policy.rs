//! Risk policy: critical roles, high-risk gating and retry backoff
//!
//! Everything here is a pure function. The store consults these rules inside
//! its transactions; nothing in this module reads or writes state.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::model::{CircuitBreakerState, Job, Task};
use crate::roles;
use crate::time::format_ts;

/// First retry delay in seconds
pub const BACKOFF_BASE_SECS: u64 = 5;

/// Longest retry delay in seconds
pub const BACKOFF_CAP_SECS: u64 = 300;

/// Reviewer and release failures count against the circuit breaker.
pub fn is_critical_role(role: &str) -> bool {
    let role = role.trim();
    role.eq_ignore_ascii_case(roles::REVIEWER) || role.eq_ignore_ascii_case(roles::RELEASE)
}

/// Only release jobs are subject to high-risk dispatch gating.
pub fn is_high_risk_job(job: &Job) -> bool {
    job.role.trim().eq_ignore_ascii_case(roles::RELEASE)
}

/// Exponential backoff: `min(300, 5 * 2^(attempt - 1))`, attempt floored to 1.
pub fn retry_backoff_seconds(attempt: u32) -> u64 {
    let exponent = attempt.max(1) - 1;
    // 5 * 2^6 already exceeds the cap
    if exponent >= 6 {
        return BACKOFF_CAP_SECS;
    }
    (BACKOFF_BASE_SECS << exponent).min(BACKOFF_CAP_SECS)
}

/// When a job retried for the given attempt becomes eligible again
pub fn next_run_at_from_attempt(now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
    // The cap keeps this well inside i64 range
    now + Duration::seconds(retry_backoff_seconds(attempt) as i64)
}

/// Whether a high-risk job of this task may be dispatched right now.
///
/// Emergency stop or an open breaker always block. Otherwise the task only
/// blocks when it explicitly declares that rollback is unavailable.
pub fn can_dispatch_high_risk(
    task: &Task,
    circuit: &CircuitBreakerState,
    emergency_stop_active: bool,
) -> bool {
    if emergency_stop_active || circuit.is_open() {
        return false;
    }
    task.rollback_available()
}

/// Payload stored with every rollback record
pub fn rollback_descriptor(
    task: &Task,
    trigger: &str,
    reason: &str,
    canceled_jobs: &[String],
    at: DateTime<Utc>,
) -> Value {
    json!({
        "task_id": task.task_id,
        "repo": task.repo,
        "branch": task.branch,
        "trigger": trigger,
        "reason": reason,
        "previous_status": task.status.as_str(),
        "canceled_job_ids": canceled_jobs,
        "rollback_available": task.rollback_available(),
        "at": format_ts(at),
    })
}

/// Clamp an optional integer into `[min, max]`, using `fallback` when absent.
pub fn clamp_int(value: Option<i64>, min: i64, max: i64, fallback: i64) -> i64 {
    value.unwrap_or(fallback).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{CircuitStatus, JobStatus, Priority, RiskProfile, TaskStatus};
    use crate::DagProgress;

    fn task_with_metadata(metadata: Value) -> Task {
        let now = Utc::now();
        Task {
            task_id: "task_1".into(),
            goal: "ship".into(),
            repo: "org/repo".into(),
            branch: "main".into(),
            acceptance_criteria: vec![],
            priority: Priority::P1,
            risk_profile: RiskProfile::High,
            status: TaskStatus::Releasing,
            parallelism_limit: 8,
            metadata,
            degraded: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_reason: None,
            dag_progress: DagProgress::default(),
        }
    }

    fn circuit(status: CircuitStatus) -> CircuitBreakerState {
        CircuitBreakerState {
            scope: "global".into(),
            status,
            failure_count: 0,
            threshold: 3,
            opened_at: None,
            reason: None,
            updated_at: Utc::now(),
        }
    }

    fn job_with_role(role: &str) -> Job {
        let now = Utc::now();
        Job {
            job_id: "job_1".into(),
            task_id: "task_1".into(),
            node_id: "releasing".into(),
            role: role.into(),
            payload: Value::Null,
            timeout_s: 60,
            max_retries: 1,
            attempt: 0,
            status: JobStatus::Queued,
            worker_id: None,
            depends_on: vec![],
            next_run_at: None,
            last_error: None,
            artifacts: Value::Null,
            logs: Value::Null,
            metrics: Value::Null,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_critical_roles() {
        assert!(is_critical_role("reviewer"));
        assert!(is_critical_role("RELEASE"));
        assert!(!is_critical_role("coder"));
        assert!(!is_critical_role("tester"));
    }

    #[test]
    fn test_high_risk_is_release_only() {
        assert!(is_high_risk_job(&job_with_role("Release")));
        assert!(!is_high_risk_job(&job_with_role("reviewer")));
    }

    #[test]
    fn test_backoff_law() {
        assert_eq!(retry_backoff_seconds(0), 5);
        assert_eq!(retry_backoff_seconds(1), 5);
        assert_eq!(retry_backoff_seconds(2), 10);
        assert_eq!(retry_backoff_seconds(4), 40);
        assert_eq!(retry_backoff_seconds(6), 160);
        assert_eq!(retry_backoff_seconds(7), 300);
        assert_eq!(retry_backoff_seconds(10), 300);
        assert_eq!(retry_backoff_seconds(u32::MAX), 300);
        for n in 1..=12u32 {
            let expected = (5u64 * 2u64.pow(n - 1)).min(300);
            assert_eq!(retry_backoff_seconds(n), expected);
        }
    }

    #[test]
    fn test_next_run_at_adds_backoff() {
        let now = Utc::now();
        assert_eq!(next_run_at_from_attempt(now, 3) - now, Duration::seconds(20));
    }

    #[test]
    fn test_high_risk_gating() {
        let permissive = task_with_metadata(json!({}));
        let explicit_false = task_with_metadata(json!({"rollback_available": false}));

        assert!(can_dispatch_high_risk(&permissive, &circuit(CircuitStatus::Closed), false));
        assert!(!can_dispatch_high_risk(&permissive, &circuit(CircuitStatus::Closed), true));
        assert!(!can_dispatch_high_risk(&permissive, &circuit(CircuitStatus::Open), false));
        assert!(!can_dispatch_high_risk(&explicit_false, &circuit(CircuitStatus::Closed), false));
    }

    #[test]
    fn test_rollback_descriptor_shape() {
        let task = task_with_metadata(json!({"rollback_available": true}));
        let descriptor = rollback_descriptor(
            &task,
            "auto",
            "release failed",
            &["job_a".to_string()],
            Utc::now(),
        );
        assert_eq!(descriptor["trigger"], "auto");
        assert_eq!(descriptor["previous_status"], "releasing");
        assert_eq!(descriptor["canceled_job_ids"][0], "job_a");
    }

    #[test]
    fn test_clamp_int() {
        assert_eq!(clamp_int(None, 1, 10, 8), 8);
        assert_eq!(clamp_int(Some(0), 1, 10, 8), 1);
        assert_eq!(clamp_int(Some(99), 1, 10, 8), 10);
        assert_eq!(clamp_int(None, 1, 10, 50), 10);
    }
}
