//! Rollback and circuit breaker bookkeeping
//!
//! These run inside the caller's transaction so the safety effects commit
//! or vanish together with the job write that caused them.

use acp_core::policy::rollback_descriptor;
use acp_core::time::format_ts;
use acp_core::{decisions, events, CircuitBreakerState, Job, JobStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use turso::{params, Connection};

use crate::error::Result;
use crate::rows::{append_decision, append_event, fetch_circuit, require_task, status_list};
use crate::schema::GLOBAL_SCOPE;

/// What started a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTrigger {
    /// Terminal release failure
    Auto,
    /// Operator `force_rollback`
    Manual,
}

impl RollbackTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    fn decision_type(&self) -> &'static str {
        match self {
            Self::Auto => decisions::AUTO_ROLLBACK,
            Self::Manual => decisions::MANUAL_ROLLBACK,
        }
    }
}

/// Cancel every outstanding job of a task, returning the canceled ids
pub(crate) async fn cancel_outstanding_jobs(
    conn: &Connection,
    task_id: &str,
    note: &str,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let outstanding = status_list(&JobStatus::OUTSTANDING);
    let query = format!(
        "SELECT job_id FROM jobs WHERE task_id = ? AND status IN ({}) ORDER BY position ASC",
        outstanding
    );
    let mut rows = conn.query(&query, params![task_id]).await?;
    let mut job_ids = Vec::new();
    while let Some(row) = rows.next().await? {
        job_ids.push(row.get::<String>(0)?);
    }
    drop(rows);

    if job_ids.is_empty() {
        return Ok(job_ids);
    }

    let ts = format_ts(now);
    let update = format!(
        "UPDATE jobs SET status = 'canceled', last_error = ?, completed_at = ?, updated_at = ? \
         WHERE task_id = ? AND status IN ({})",
        outstanding
    );
    conn.execute(&update, params![note, ts.clone(), ts, task_id])
        .await?;
    Ok(job_ids)
}

/// Cancel outstanding work and mark the task rolled back.
///
/// Returns false when the task was already rolled back.
pub(crate) async fn mark_task_rolled_back(
    conn: &Connection,
    task_id: &str,
    trigger: RollbackTrigger,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let task = require_task(conn, task_id).await?;
    if task.status == TaskStatus::RolledBack {
        return Ok(false);
    }

    let canceled =
        cancel_outstanding_jobs(conn, task_id, &format!("rollback: {}", reason), now).await?;

    let ts = format_ts(now);
    conn.execute(
        "UPDATE tasks SET status = 'rolled_back', degraded = 1, failed_reason = ?, \
         completed_at = ?, updated_at = ? WHERE task_id = ?",
        params![reason, ts.clone(), ts.clone(), task_id],
    )
    .await?;

    let descriptor = rollback_descriptor(&task, trigger.as_str(), reason, &canceled, now);
    conn.execute(
        "INSERT INTO rollback_records \
         (task_id, trigger_kind, reason, canceled_jobs, payload, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            task_id,
            trigger.as_str(),
            reason,
            canceled.len() as i64,
            serde_json::to_string(&descriptor)?,
            ts
        ],
    )
    .await?;

    append_decision(
        conn,
        Some(task_id),
        trigger.decision_type(),
        json!({
            "reason": reason,
            "previous_status": task.status.as_str(),
            "canceled_jobs": canceled.len(),
        }),
        now,
    )
    .await?;
    append_event(
        conn,
        task_id,
        events::TASK_ROLLED_BACK,
        json!({
            "trigger": trigger.as_str(),
            "reason": reason,
            "canceled_job_ids": canceled,
        }),
        now,
    )
    .await?;

    warn!(
        task_id = %task_id,
        trigger = trigger.as_str(),
        canceled = canceled.len(),
        "Task rolled back: {}",
        reason
    );
    Ok(true)
}

/// Count a terminal failure of a critical job against the breaker
pub(crate) async fn register_critical_failure(
    conn: &Connection,
    job: &Job,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<CircuitBreakerState> {
    let circuit = fetch_circuit(conn).await?;
    let ts = format_ts(now);

    if circuit.is_open() {
        conn.execute(
            "UPDATE circuit_breakers SET reason = ?, updated_at = ? WHERE scope = ?",
            params![reason, ts, GLOBAL_SCOPE],
        )
        .await?;
        return fetch_circuit(conn).await;
    }

    let failure_count = circuit.failure_count + 1;
    if failure_count >= circuit.threshold {
        conn.execute(
            "UPDATE circuit_breakers SET status = 'open', failure_count = ?, opened_at = ?, \
             reason = ?, updated_at = ? WHERE scope = ?",
            params![
                i64::from(failure_count),
                ts.clone(),
                reason,
                ts,
                GLOBAL_SCOPE
            ],
        )
        .await?;
        append_decision(
            conn,
            Some(job.task_id.as_str()),
            decisions::OPEN_CIRCUIT_BREAKER,
            json!({
                "job_id": job.job_id,
                "role": job.role,
                "failure_count": failure_count,
                "threshold": circuit.threshold,
                "reason": reason,
            }),
            now,
        )
        .await?;
        warn!(
            failure_count,
            threshold = circuit.threshold,
            "Circuit breaker opened after {} critical failures",
            failure_count
        );
    } else {
        conn.execute(
            "UPDATE circuit_breakers SET failure_count = ?, reason = ?, updated_at = ? \
             WHERE scope = ?",
            params![i64::from(failure_count), reason, ts, GLOBAL_SCOPE],
        )
        .await?;
        info!(
            failure_count,
            threshold = circuit.threshold,
            "Critical failure recorded for job {}",
            job.job_id
        );
    }
    fetch_circuit(conn).await
}

/// A critical success clears the count, but never closes an open breaker
pub(crate) async fn register_critical_success(conn: &Connection, now: DateTime<Utc>) -> Result<()> {
    let circuit = fetch_circuit(conn).await?;
    if circuit.is_open() || circuit.failure_count == 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE circuit_breakers SET failure_count = 0, reason = NULL, updated_at = ? \
         WHERE scope = ? AND status = 'closed'",
        params![format_ts(now), GLOBAL_SCOPE],
    )
    .await?;
    info!("Critical success reset circuit breaker failure count");
    Ok(())
}

/// Close the breaker and clear its count
pub(crate) async fn reset_circuit(conn: &Connection, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE circuit_breakers SET status = 'closed', failure_count = 0, opened_at = NULL, \
         reason = NULL, updated_at = ? WHERE scope = ?",
        params![format_ts(now), GLOBAL_SCOPE],
    )
    .await?;
    info!("Circuit breaker reset");
    Ok(())
}
