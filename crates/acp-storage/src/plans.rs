//! Plan attachment and job instantiation

use acp_core::time::format_ts;
use acp_core::{decisions, events, new_job_id, ExecutionPlan, JobStatus, Task};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info};
use turso::{params, Connection};

use crate::error::{Result, StoreError};
use crate::rows::{
    append_decision, append_event, count_rows, require_hydrated_task, require_task, JOB_COLUMNS,
};
use crate::StateStore;

pub(crate) async fn fetch_plan(conn: &Connection, task_id: &str) -> Result<Option<ExecutionPlan>> {
    let mut rows = conn
        .query("SELECT plan FROM task_plans WHERE task_id = ?", params![task_id])
        .await?;
    match rows.next().await? {
        Some(row) => {
            let raw: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&raw)?))
        }
        None => Ok(None),
    }
}

/// Reject plans that could never run to completion
fn validate_plan(plan: &ExecutionPlan) -> Result<()> {
    if plan.nodes.is_empty() {
        return Err(StoreError::Validation("plan has no nodes".into()));
    }

    let mut seen = HashSet::new();
    for node in &plan.nodes {
        if node.node_id.trim().is_empty() {
            return Err(StoreError::Validation("plan node without node_id".into()));
        }
        if node.role.trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "plan node {} has no role",
                node.node_id
            )));
        }
        if !seen.insert(node.node_id.as_str()) {
            return Err(StoreError::Validation(format!(
                "duplicate plan node {}",
                node.node_id
            )));
        }
    }

    for node in &plan.nodes {
        if let Some(missing) = node.depends_on.iter().find(|dep| !seen.contains(dep.as_str())) {
            return Err(StoreError::Validation(format!(
                "plan node {} depends on unknown node {}",
                node.node_id, missing
            )));
        }
    }
    Ok(())
}

impl StateStore {
    /// Claim a queued task for planning (`queued -> planning`).
    ///
    /// Returns false when the task was not queued, e.g. another tick got it.
    pub async fn begin_planning(&self, task_id: &str) -> Result<bool> {
        let now = Utc::now();
        transactional!(self, |conn| {
            require_task(conn, task_id).await?;
            let ts = format_ts(now);
            let updated = conn
                .execute(
                    "UPDATE tasks SET status = 'planning', updated_at = ? \
                     WHERE task_id = ? AND status = 'queued'",
                    params![ts, task_id],
                )
                .await?;
            if updated != 1 {
                return Ok(false);
            }
            append_event(conn, task_id, events::TASK_PLANNING, json!({}), now).await?;
            Ok(true)
        })
    }

    /// Attach an execution plan and instantiate one job per node.
    ///
    /// Idempotent: when the task already has jobs only the stored plan and
    /// the task's parallelism limit are refreshed. A queued or planning task
    /// moves to `running`; a paused task stays paused until resumed.
    pub async fn attach_plan(
        &self,
        task_id: &str,
        plan: &ExecutionPlan,
        reason: Option<&str>,
    ) -> Result<Task> {
        validate_plan(plan)?;
        let parallelism = i64::from(plan.parallelism_limit.clamp(1, 10));
        let plan_json = serde_json::to_string(plan)?;
        let now = Utc::now();

        transactional!(self, |conn| {
            let task = require_task(conn, task_id).await?;
            if task.status.is_terminal() {
                return Err(StoreError::InvalidTransition {
                    task_id: task_id.to_string(),
                    action: "attach_plan".into(),
                    status: task.status.to_string(),
                });
            }

            let ts = format_ts(now);
            conn.execute(
                "INSERT INTO task_plans (task_id, plan, reason, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT(task_id) DO UPDATE SET \
                 plan = excluded.plan, reason = excluded.reason, updated_at = excluded.updated_at",
                params![
                    task_id,
                    plan_json.as_str(),
                    reason.map(str::to_string),
                    ts.clone(),
                    ts.clone()
                ],
            )
            .await?;

            let existing = count_rows(
                conn,
                "SELECT COUNT(*) FROM jobs WHERE task_id = ?",
                vec![task_id.to_string().into()],
            )
            .await?;

            let insert = format!(
                "INSERT INTO jobs (position, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, NULL, ?, ?, \
                 NULL, 'null', 'null', 'null', ?, ?, NULL, NULL)",
                JOB_COLUMNS
            );
            let mut created = 0u32;
            if existing == 0 {
                for (position, node) in plan.nodes.iter().enumerate() {
                    let (status, next_run_at) = if node.depends_on.is_empty() {
                        (JobStatus::Queued, Some(ts.clone()))
                    } else {
                        (JobStatus::Blocked, None)
                    };
                    conn.execute(
                        &insert,
                        params![
                            position as i64,
                            new_job_id(),
                            task_id,
                            node.node_id.as_str(),
                            node.role.trim(),
                            serde_json::to_string(&node.payload)?,
                            node.timeout_s as i64,
                            i64::from(node.max_retries),
                            status.as_str(),
                            serde_json::to_string(&node.depends_on)?,
                            next_run_at,
                            ts.clone(),
                            ts.clone()
                        ],
                    )
                    .await?;
                    created += 1;
                }
            }

            conn.execute(
                "UPDATE tasks SET parallelism_limit = ?, \
                 status = CASE WHEN status IN ('queued', 'planning') THEN 'running' ELSE status END, \
                 started_at = COALESCE(started_at, ?), updated_at = ? WHERE task_id = ?",
                params![parallelism, ts.clone(), ts, task_id],
            )
            .await?;

            if created > 0 {
                append_event(
                    conn,
                    task_id,
                    events::TASK_PLANNED,
                    json!({
                        "jobs": created,
                        "parallelism_limit": parallelism,
                        "reason": reason,
                    }),
                    now,
                )
                .await?;
                append_decision(
                    conn,
                    Some(task_id),
                    decisions::PLAN_CREATED,
                    json!({
                        "nodes": plan.nodes.iter().map(|n| n.node_id.as_str()).collect::<Vec<_>>(),
                        "edges": plan.edges.len(),
                        "parallelism_limit": parallelism,
                        "reason": reason.map(|r| Value::String(r.to_string())).unwrap_or(Value::Null),
                    }),
                    now,
                )
                .await?;
                info!(task_id = %task_id, jobs = created, "Plan attached");
            } else {
                debug!(task_id = %task_id, "Plan refreshed, jobs already exist");
            }

            require_hydrated_task(conn, task_id).await
        })
    }
}
