//! Dependency unblocking and task status recomputation

use acp_core::time::format_ts;
use acp_core::{derive_phase, events, JobStatus, PhaseDecision, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use turso::{params, Connection};

use crate::error::Result;
use crate::rows::{append_event, fetch_jobs_for_task, require_hydrated_task, require_task};
use crate::safety::{mark_task_rolled_back, RollbackTrigger};
use crate::StateStore;

/// Move blocked jobs whose dependencies all completed to queued
pub(crate) async fn unblock_in_tx(
    conn: &Connection,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<u32> {
    let jobs = fetch_jobs_for_task(conn, task_id).await?;
    let by_node: HashMap<&str, JobStatus> = jobs
        .iter()
        .map(|job| (job.node_id.as_str(), job.status))
        .collect();

    let ts = format_ts(now);
    let mut changed = 0u32;
    for job in jobs.iter().filter(|job| job.status == JobStatus::Blocked) {
        let ready = job
            .depends_on
            .iter()
            .all(|dep| by_node.get(dep.as_str()) == Some(&JobStatus::Completed));
        if !ready {
            continue;
        }

        let updated = conn
            .execute(
                "UPDATE jobs SET status = 'queued', next_run_at = ?, updated_at = ? \
                 WHERE job_id = ? AND status = 'blocked'",
                params![ts.clone(), ts.clone(), job.job_id.as_str()],
            )
            .await?;
        if updated != 1 {
            continue;
        }

        append_event(
            conn,
            task_id,
            events::JOB_UNBLOCKED,
            json!({"job_id": job.job_id, "node_id": job.node_id, "role": job.role}),
            now,
        )
        .await?;
        changed += 1;
    }

    if changed > 0 {
        debug!(task_id = %task_id, changed, "Unblocked jobs");
        recompute_in_tx(conn, task_id, now).await?;
    }
    Ok(changed)
}

/// Re-derive a task's status from its jobs and persist any change.
///
/// Terminal and paused tasks are left alone. Returns the new status when it
/// changed.
pub(crate) async fn recompute_in_tx(
    conn: &Connection,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<TaskStatus>> {
    let task = require_task(conn, task_id).await?;
    if task.status.is_frozen() {
        return Ok(None);
    }

    let jobs = fetch_jobs_for_task(conn, task_id).await?;
    let Some(decision) = derive_phase(&jobs) else {
        return Ok(None);
    };
    let target = decision.status();
    if target == task.status {
        return Ok(None);
    }

    let ts = format_ts(now);
    match decision {
        PhaseDecision::RollBack { reason, .. } => {
            mark_task_rolled_back(conn, task_id, RollbackTrigger::Auto, &reason, now).await?;
        }
        PhaseDecision::Fail { job_id, reason } => {
            let updated = conn
                .execute(
                    "UPDATE tasks SET status = 'failed', failed_reason = ?, completed_at = ?, \
                     updated_at = ? WHERE task_id = ? AND status = ?",
                    params![
                        reason.as_str(),
                        ts.clone(),
                        ts,
                        task_id,
                        task.status.as_str()
                    ],
                )
                .await?;
            if updated != 1 {
                return Ok(None);
            }
            append_event(
                conn,
                task_id,
                events::TASK_FAILED,
                json!({"job_id": job_id, "reason": reason}),
                now,
            )
            .await?;
            warn!(task_id = %task_id, "Task failed: {}", reason);
        }
        PhaseDecision::Done => {
            let updated = conn
                .execute(
                    "UPDATE tasks SET status = 'done', completed_at = ?, updated_at = ? \
                     WHERE task_id = ? AND status = ?",
                    params![ts.clone(), ts, task_id, task.status.as_str()],
                )
                .await?;
            if updated != 1 {
                return Ok(None);
            }
            append_event(conn, task_id, events::TASK_DONE, json!({"jobs": jobs.len()}), now)
                .await?;
            info!(task_id = %task_id, "Task done");
        }
        PhaseDecision::Active(phase) => {
            let updated = conn
                .execute(
                    "UPDATE tasks SET status = ?, started_at = COALESCE(started_at, ?), \
                     updated_at = ? WHERE task_id = ? AND status = ?",
                    params![
                        phase.as_str(),
                        ts.clone(),
                        ts,
                        task_id,
                        task.status.as_str()
                    ],
                )
                .await?;
            if updated != 1 {
                return Ok(None);
            }
            append_event(
                conn,
                task_id,
                events::TASK_PHASE_CHANGED,
                json!({"from": task.status.as_str(), "to": phase.as_str()}),
                now,
            )
            .await?;
            debug!(task_id = %task_id, from = %task.status, to = %phase, "Task phase changed");
        }
    }
    Ok(Some(target))
}

impl StateStore {
    /// Queue every blocked job of the task whose dependencies completed.
    ///
    /// Returns how many jobs changed; calling again without new completions
    /// returns 0.
    pub async fn unblock_ready_jobs(&self, task_id: &str) -> Result<u32> {
        let now = Utc::now();
        transactional!(self, |conn| { unblock_in_tx(conn, task_id, now).await })
    }

    /// Bring the task's status in line with its jobs and return it.
    pub async fn recompute_task_status(&self, task_id: &str) -> Result<Task> {
        let now = Utc::now();
        transactional!(self, |conn| {
            recompute_in_tx(conn, task_id, now).await?;
            require_hydrated_task(conn, task_id).await
        })
    }
}
