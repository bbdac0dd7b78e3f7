//! Applying worker result reports
//!
//! A report either completes the job, schedules a retry, or ends the job in
//! a terminal failure. Terminal jobs are immutable: a repeated report comes
//! back flagged as a duplicate and changes nothing.

use acp_core::policy::{
    is_critical_role, is_high_risk_job, next_run_at_from_attempt, retry_backoff_seconds,
};
use acp_core::time::format_ts;
use acp_core::{events, Job, ResultStatus, WorkerResult, WorkerResultOutcome};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};
use turso::{params, Connection};

use crate::error::{Result, StoreError};
use crate::progress::recompute_in_tx;
use crate::rows::{append_event, require_hydrated_task, require_job};
use crate::safety::{
    mark_task_rolled_back, register_critical_failure, register_critical_success, RollbackTrigger,
};
use crate::StateStore;

/// Outputs to store: reported values win, otherwise keep what the job had
struct Outputs {
    artifacts: String,
    logs: String,
    metrics: String,
}

impl Outputs {
    fn merge(job: &Job, result: &WorkerResult) -> Result<Self> {
        let pick = |reported: &Option<Value>, current: &Value| -> Result<String> {
            Ok(serde_json::to_string(reported.as_ref().unwrap_or(current))?)
        };
        Ok(Self {
            artifacts: pick(&result.artifacts, &job.artifacts)?,
            logs: pick(&result.logs, &job.logs)?,
            metrics: pick(&result.metrics, &job.metrics)?,
        })
    }
}

fn reported_error(result: &WorkerResult, outcome: ResultStatus) -> String {
    result
        .error
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("worker reported {}", outcome.job_status()))
}

async fn load_outcome(
    conn: &Connection,
    job_id: &str,
    duplicate: bool,
) -> Result<WorkerResultOutcome> {
    let job = require_job(conn, job_id).await?;
    let task = require_hydrated_task(conn, &job.task_id).await?;
    Ok(WorkerResultOutcome {
        job,
        task,
        duplicate,
    })
}

async fn complete_job(
    conn: &Connection,
    job: &Job,
    owner: Option<&str>,
    outputs: &Outputs,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ts = format_ts(now);
    let updated = conn
        .execute(
            "UPDATE jobs SET status = 'completed', worker_id = ?, artifacts = ?, logs = ?, \
             metrics = ?, last_error = NULL, completed_at = ?, updated_at = ? \
             WHERE job_id = ? AND status = ?",
            params![
                owner.map(str::to_string),
                outputs.artifacts.as_str(),
                outputs.logs.as_str(),
                outputs.metrics.as_str(),
                ts.clone(),
                ts,
                job.job_id.as_str(),
                job.status.as_str()
            ],
        )
        .await?;
    if updated != 1 {
        return Ok(false);
    }

    append_event(
        conn,
        &job.task_id,
        events::JOB_COMPLETED,
        json!({"job_id": job.job_id, "node_id": job.node_id, "worker_id": owner}),
        now,
    )
    .await?;
    if is_critical_role(&job.role) {
        register_critical_success(conn, now).await?;
    }
    info!(job_id = %job.job_id, role = %job.role, "Job completed");
    Ok(true)
}

async fn schedule_retry(
    conn: &Connection,
    job: &Job,
    owner: Option<&str>,
    outputs: &Outputs,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let attempt = job.attempt + 1;
    let next_run_at = next_run_at_from_attempt(now, attempt);
    let ts = format_ts(now);
    let updated = conn
        .execute(
            "UPDATE jobs SET status = 'queued', attempt = ?, next_run_at = ?, last_error = ?, \
             worker_id = ?, artifacts = ?, logs = ?, metrics = ?, updated_at = ? \
             WHERE job_id = ? AND status = ?",
            params![
                i64::from(attempt),
                format_ts(next_run_at),
                error,
                owner.map(str::to_string),
                outputs.artifacts.as_str(),
                outputs.logs.as_str(),
                outputs.metrics.as_str(),
                ts,
                job.job_id.as_str(),
                job.status.as_str()
            ],
        )
        .await?;
    if updated != 1 {
        return Ok(false);
    }

    append_event(
        conn,
        &job.task_id,
        events::JOB_RETRY_SCHEDULED,
        json!({
            "job_id": job.job_id,
            "attempt": attempt,
            "max_retries": job.max_retries,
            "backoff_s": retry_backoff_seconds(attempt),
            "next_run_at": format_ts(next_run_at),
            "error": error,
        }),
        now,
    )
    .await?;
    info!(
        job_id = %job.job_id,
        attempt,
        max_retries = job.max_retries,
        "Retry scheduled: {}",
        error
    );
    Ok(true)
}

async fn finish_job(
    conn: &Connection,
    job: &Job,
    outcome: ResultStatus,
    owner: Option<&str>,
    outputs: &Outputs,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let status = outcome.job_status();
    let ts = format_ts(now);
    let updated = conn
        .execute(
            "UPDATE jobs SET status = ?, last_error = ?, worker_id = ?, artifacts = ?, logs = ?, \
             metrics = ?, completed_at = ?, updated_at = ? WHERE job_id = ? AND status = ?",
            params![
                status.as_str(),
                error,
                owner.map(str::to_string),
                outputs.artifacts.as_str(),
                outputs.logs.as_str(),
                outputs.metrics.as_str(),
                ts.clone(),
                ts,
                job.job_id.as_str(),
                job.status.as_str()
            ],
        )
        .await?;
    if updated != 1 {
        return Ok(false);
    }

    append_event(
        conn,
        &job.task_id,
        &format!("job.{}", status),
        json!({
            "job_id": job.job_id,
            "node_id": job.node_id,
            "attempt": job.attempt,
            "error": error,
        }),
        now,
    )
    .await?;
    warn!(job_id = %job.job_id, role = %job.role, status = %status, "Job ended: {}", error);

    if is_critical_role(&job.role) {
        register_critical_failure(conn, job, error, now).await?;
    }
    if is_high_risk_job(job) {
        let reason = format!("release job {} {}: {}", job.job_id, status, error);
        mark_task_rolled_back(conn, &job.task_id, RollbackTrigger::Auto, &reason, now).await?;
    }
    Ok(true)
}

impl StateStore {
    /// Apply a worker's report for one job.
    ///
    /// Reports for terminal jobs return `duplicate: true` untouched. A
    /// `worker_id` that differs from the job's recorded owner is rejected.
    pub async fn apply_worker_result(&self, result: &WorkerResult) -> Result<WorkerResultOutcome> {
        let job_id = result.job_id.trim().to_string();
        if job_id.is_empty() {
            return Err(StoreError::Validation("job_id is required".into()));
        }
        let worker = result
            .worker_id
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string);
        let now = Utc::now();

        transactional!(self, |conn| {
            let job = require_job(conn, &job_id).await?;
            if job.status.is_terminal() {
                return load_outcome(conn, &job_id, true).await;
            }

            if let (Some(worker), Some(owner)) = (worker.as_deref(), job.worker_id.as_deref()) {
                if worker != owner {
                    return Err(StoreError::JobOwnedByOtherWorker {
                        job_id: job_id.clone(),
                        owner: owner.to_string(),
                        worker_id: worker.to_string(),
                    });
                }
            }

            let owner = job.worker_id.clone().or_else(|| worker.clone());
            let status = ResultStatus::normalize(&result.status);
            let outputs = Outputs::merge(&job, result)?;

            let applied = match status {
                ResultStatus::Completed => {
                    complete_job(conn, &job, owner.as_deref(), &outputs, now).await?
                }
                _ if status.is_retriable() && job.attempt < job.max_retries => {
                    let error = reported_error(result, status);
                    schedule_retry(conn, &job, owner.as_deref(), &outputs, &error, now).await?
                }
                _ => {
                    let error = reported_error(result, status);
                    finish_job(conn, &job, status, owner.as_deref(), &outputs, &error, now).await?
                }
            };

            if !applied {
                // Lost a race with another writer; report what is stored now
                return load_outcome(conn, &job_id, true).await;
            }

            recompute_in_tx(conn, &job.task_id, now).await?;
            load_outcome(conn, &job_id, false).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_error_fallback() {
        let result = WorkerResult::new("job_1", "timeout");
        assert_eq!(
            reported_error(&result, ResultStatus::Timeout),
            "worker reported timeout"
        );
        let result = result.with_error("  boom ");
        assert_eq!(reported_error(&result, ResultStatus::Timeout), "boom");
    }
}
