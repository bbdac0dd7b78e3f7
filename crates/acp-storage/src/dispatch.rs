//! Admission-controlled dispatch and worker claims
//!
//! Dispatch selects queued jobs oldest-first, honouring the global slot cap,
//! each task's parallelism limit and high-risk gating. Claims hand
//! dispatched jobs to a worker. Both transitions are CAS updates so a
//! concurrent caller that loses the race simply skips the job.

use acp_core::policy::{can_dispatch_high_risk, clamp_int, is_high_risk_job};
use acp_core::time::format_ts;
use acp_core::{events, ClaimedJob, Job, Task, TaskStatus};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};
use turso::params;

use crate::error::{Result, StoreError};
use crate::progress::recompute_in_tx;
use crate::rows::{
    append_event, count_active_jobs, fetch_circuit, fetch_emergency_stop, parse_job_row,
    qualified, require_job, require_task, task_status_list, JOB_COLUMNS,
};
use crate::StateStore;

/// Candidates fetched per free slot, to survive per-task filtering
const OVERFETCH_FACTOR: u32 = 6;
const OVERFETCH_PAD: u32 = 20;

/// Per-task state while selecting candidates
struct TaskBudget {
    task: Task,
    active: u32,
}

impl StateStore {
    /// Queued jobs that may be dispatched now, at most `limit`.
    ///
    /// Empty under emergency stop or when no global slot is free.
    pub async fn get_dispatchable_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let global_cap = self.options.global_parallelism;
        read_only!(self, |conn| {
            let stop = fetch_emergency_stop(conn).await?;
            if stop.active {
                return Ok(Vec::new());
            }

            let active = count_active_jobs(conn, None).await?;
            let slots = limit.min(global_cap.saturating_sub(active));
            if slots == 0 {
                return Ok(Vec::new());
            }
            let circuit = fetch_circuit(conn).await?;

            let query = format!(
                "SELECT {} FROM jobs j JOIN tasks t ON t.task_id = j.task_id \
                 WHERE j.status = 'queued' AND (j.next_run_at IS NULL OR j.next_run_at <= ?) \
                 AND t.status IN ({}) \
                 ORDER BY j.created_at ASC, j.position ASC LIMIT ?",
                qualified(JOB_COLUMNS, "j"),
                task_status_list(&TaskStatus::DISPATCHABLE)
            );
            let fetch = i64::from(slots * OVERFETCH_FACTOR + OVERFETCH_PAD);
            let mut rows = conn
                .query(&query, params![format_ts(Utc::now()), fetch])
                .await?;
            let mut candidates = Vec::new();
            while let Some(row) = rows.next().await? {
                candidates.push(parse_job_row(&row)?);
            }
            drop(rows);

            let mut budgets: HashMap<String, TaskBudget> = HashMap::new();
            let mut selected = Vec::new();
            for job in candidates {
                if selected.len() as u32 >= slots {
                    break;
                }
                if !budgets.contains_key(&job.task_id) {
                    let task = require_task(conn, &job.task_id).await?;
                    let active = count_active_jobs(conn, Some(&job.task_id)).await?;
                    budgets.insert(job.task_id.clone(), TaskBudget { task, active });
                }
                let Some(budget) = budgets.get_mut(&job.task_id) else {
                    continue;
                };

                if budget.active >= budget.task.parallelism_limit {
                    continue;
                }
                if is_high_risk_job(&job)
                    && !can_dispatch_high_risk(&budget.task, &circuit, stop.active)
                {
                    debug!(job_id = %job.job_id, "High-risk job held back");
                    continue;
                }
                budget.active += 1;
                selected.push(job);
            }
            Ok(selected)
        })
    }

    /// Move each job `queued -> dispatched`; returns how many moved.
    ///
    /// Jobs no longer queued are skipped. Nothing moves while the emergency
    /// stop is active.
    pub async fn dispatch_jobs(&self, job_ids: &[String], dispatcher_id: &str) -> Result<u32> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        transactional!(self, |conn| {
            if fetch_emergency_stop(conn).await?.active {
                return Ok(0);
            }

            let ts = format_ts(now);
            let mut dispatched = 0u32;
            for job_id in job_ids {
                let updated = conn
                    .execute(
                        "UPDATE jobs SET status = 'dispatched', updated_at = ? \
                         WHERE job_id = ? AND status = 'queued'",
                        params![ts.clone(), job_id.as_str()],
                    )
                    .await?;
                if updated != 1 {
                    continue;
                }

                let job = require_job(conn, job_id).await?;
                append_event(
                    conn,
                    &job.task_id,
                    events::JOB_DISPATCHED,
                    json!({
                        "job_id": job.job_id,
                        "node_id": job.node_id,
                        "role": job.role,
                        "attempt": job.attempt,
                        "dispatcher_id": dispatcher_id,
                    }),
                    now,
                )
                .await?;
                dispatched += 1;
            }

            if dispatched > 0 {
                info!(dispatcher = %dispatcher_id, dispatched, "Dispatched jobs");
            }
            Ok(dispatched)
        })
    }

    /// Hand up to `limit` dispatched jobs to a worker, oldest first.
    ///
    /// A job that already has an owner is only offered back to that owner.
    pub async fn claim_dispatched_jobs(
        &self,
        worker_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<ClaimedJob>> {
        let worker_id = worker_id.trim();
        if worker_id.is_empty() {
            return Err(StoreError::Validation("worker_id is required".into()));
        }
        let limit = clamp_int(
            limit.map(i64::from),
            1,
            i64::from(self.options.claim_limit_max),
            1,
        );
        let now = Utc::now();

        transactional!(self, |conn| {
            if fetch_emergency_stop(conn).await?.active {
                return Ok(Vec::new());
            }

            let query = format!(
                "SELECT {} FROM jobs j JOIN tasks t ON t.task_id = j.task_id \
                 WHERE j.status = 'dispatched' AND (j.worker_id IS NULL OR j.worker_id = ?) \
                 AND t.status IN ({}) \
                 ORDER BY j.created_at ASC, j.position ASC LIMIT ?",
                qualified(JOB_COLUMNS, "j"),
                task_status_list(&TaskStatus::DISPATCHABLE)
            );
            let mut rows = conn.query(&query, params![worker_id, limit]).await?;
            let mut candidates = Vec::new();
            while let Some(row) = rows.next().await? {
                candidates.push(parse_job_row(&row)?);
            }
            drop(rows);

            let ts = format_ts(now);
            let mut claimed = Vec::new();
            for job in candidates {
                let updated = conn
                    .execute(
                        "UPDATE jobs SET status = 'running', worker_id = ?, started_at = ?, \
                         updated_at = ? WHERE job_id = ? AND status = 'dispatched' \
                         AND (worker_id IS NULL OR worker_id = ?)",
                        params![
                            worker_id,
                            ts.clone(),
                            ts.clone(),
                            job.job_id.as_str(),
                            worker_id
                        ],
                    )
                    .await?;
                if updated != 1 {
                    continue;
                }

                let job = require_job(conn, &job.job_id).await?;
                append_event(
                    conn,
                    &job.task_id,
                    events::JOB_RUNNING,
                    json!({
                        "job_id": job.job_id,
                        "worker_id": worker_id,
                        "attempt": job.attempt,
                    }),
                    now,
                )
                .await?;
                recompute_in_tx(conn, &job.task_id, now).await?;
                claimed.push(ClaimedJob::from(&job));
            }

            if !claimed.is_empty() {
                info!(worker_id = %worker_id, claimed = claimed.len(), "Worker claimed jobs");
            }
            Ok(claimed)
        })
    }
}
