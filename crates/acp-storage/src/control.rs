//! Operator control actions

use acp_core::time::format_ts;
use acp_core::{
    decisions, events, ControlRequest, GlobalControlAction, SystemControls, Task,
    TaskControlAction, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use turso::{params, Connection};

use crate::error::{Result, StoreError};
use crate::progress::recompute_in_tx;
use crate::rows::{
    append_decision, append_event, count_rows, fetch_circuit, fetch_emergency_stop,
    require_hydrated_task, require_task,
};
use crate::safety::{cancel_outstanding_jobs, mark_task_rolled_back, reset_circuit, RollbackTrigger};
use crate::StateStore;

fn invalid(task: &Task, action: TaskControlAction) -> StoreError {
    StoreError::InvalidTransition {
        task_id: task.task_id.clone(),
        action: action.to_string(),
        status: task.status.to_string(),
    }
}

fn reason_or<'a>(request: &'a ControlRequest, fallback: &'a str) -> &'a str {
    request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(fallback)
}

async fn set_task_status(
    conn: &Connection,
    task: &Task,
    status: TaskStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ts = format_ts(now);
    let completed_at = status.is_terminal().then(|| ts.clone());
    let updated = conn
        .execute(
            "UPDATE tasks SET status = ?, completed_at = COALESCE(?, completed_at), \
             updated_at = ? WHERE task_id = ? AND status = ?",
            params![
                status.as_str(),
                completed_at,
                ts,
                task.task_id.as_str(),
                task.status.as_str()
            ],
        )
        .await?;
    Ok(updated == 1)
}

impl StateStore {
    /// Apply an operator action to one task and return the task afterwards.
    ///
    /// `pause` needs a live task, `resume` a paused one; both fail with
    /// `invalid_transition` otherwise. `cancel` on a finished task is a no-op.
    pub async fn apply_task_control(
        &self,
        task_id: &str,
        action: TaskControlAction,
        request: &ControlRequest,
    ) -> Result<Task> {
        let now = Utc::now();
        transactional!(self, |conn| {
            let task = require_task(conn, task_id).await?;
            let actor = request.actor();
            let mut effect = json!(null);

            match action {
                TaskControlAction::Pause => {
                    if task.status.is_terminal() {
                        return Err(invalid(&task, action));
                    }
                    if task.status != TaskStatus::Paused
                        && set_task_status(conn, &task, TaskStatus::Paused, now).await?
                    {
                        append_event(
                            conn,
                            task_id,
                            events::TASK_PAUSED,
                            json!({"by": actor, "previous_status": task.status.as_str()}),
                            now,
                        )
                        .await?;
                    }
                }
                TaskControlAction::Resume => {
                    if task.status != TaskStatus::Paused {
                        return Err(invalid(&task, action));
                    }
                    let jobs = count_rows(
                        conn,
                        "SELECT COUNT(*) FROM jobs WHERE task_id = ?",
                        vec![task_id.to_string().into()],
                    )
                    .await?;
                    // Paused before a plan was attached: hand it back to the planner
                    let resumed = if jobs == 0 {
                        TaskStatus::Queued
                    } else {
                        TaskStatus::Running
                    };
                    set_task_status(conn, &task, resumed, now).await?;
                    append_event(
                        conn,
                        task_id,
                        events::TASK_RESUMED,
                        json!({"by": actor, "status": resumed.as_str()}),
                        now,
                    )
                    .await?;
                    let recomputed = recompute_in_tx(conn, task_id, now).await?;
                    effect = json!({
                        "resumed_to": resumed.as_str(),
                        "recomputed": recomputed.map(|s| s.as_str()),
                    });
                }
                TaskControlAction::Cancel => {
                    if !task.status.is_terminal() {
                        let reason = reason_or(request, "canceled by operator");
                        let canceled = cancel_outstanding_jobs(
                            conn,
                            task_id,
                            &format!("canceled: {}", reason),
                            now,
                        )
                        .await?;
                        set_task_status(conn, &task, TaskStatus::Canceled, now).await?;
                        append_event(
                            conn,
                            task_id,
                            events::TASK_CANCELED,
                            json!({"by": actor, "reason": reason, "canceled_job_ids": canceled}),
                            now,
                        )
                        .await?;
                        effect = json!({"canceled_jobs": canceled.len()});
                    }
                }
                TaskControlAction::EmergencyStop => {
                    let reason = reason_or(request, "emergency stop");
                    let stop =
                        Self::write_emergency_stop(conn, true, Some(actor), Some(reason), now)
                            .await?;
                    append_event(
                        conn,
                        task_id,
                        events::TASK_EMERGENCY_STOP,
                        json!({"by": actor, "reason": reason}),
                        now,
                    )
                    .await?;
                    effect = json!({"emergency_stop": stop});
                    warn!(task_id = %task_id, by = %actor, "Emergency stop activated: {}", reason);
                }
                TaskControlAction::ForceRollback => {
                    let reason = reason_or(request, "manual rollback");
                    let rolled_back =
                        mark_task_rolled_back(conn, task_id, RollbackTrigger::Manual, reason, now)
                            .await?;
                    effect = json!({"rolled_back": rolled_back});
                }
            }

            append_decision(
                conn,
                Some(task_id),
                decisions::TASK_CONTROL_ACTION,
                json!({
                    "action": action.as_str(),
                    "requested_by": actor,
                    "reason": request.reason,
                    "previous_status": task.status.as_str(),
                    "effect": effect,
                }),
                now,
            )
            .await?;
            info!(task_id = %task_id, action = %action, by = %actor, "Task control applied");
            require_hydrated_task(conn, task_id).await
        })
    }

    /// Apply a system-wide operator action and return the resulting controls.
    pub async fn apply_global_control(
        &self,
        action: GlobalControlAction,
        request: &ControlRequest,
    ) -> Result<SystemControls> {
        let now = Utc::now();
        transactional!(self, |conn| {
            let actor = request.actor();
            match action {
                GlobalControlAction::EmergencyStop => {
                    let reason = reason_or(request, "emergency stop");
                    Self::write_emergency_stop(conn, true, Some(actor), Some(reason), now).await?;
                    warn!(by = %actor, "Emergency stop activated: {}", reason);
                }
                GlobalControlAction::EmergencyStopClear => {
                    let reason = reason_or(request, "emergency stop cleared");
                    Self::write_emergency_stop(conn, false, Some(actor), Some(reason), now)
                        .await?;
                    info!(by = %actor, "Emergency stop cleared");
                }
                GlobalControlAction::CircuitReset => {
                    reset_circuit(conn, now).await?;
                }
            }

            append_decision(
                conn,
                None,
                decisions::TASK_CONTROL_ACTION,
                json!({
                    "action": action.as_str(),
                    "requested_by": actor,
                    "reason": request.reason,
                }),
                now,
            )
            .await?;

            Ok(SystemControls {
                emergency_stop: fetch_emergency_stop(conn).await?,
                circuit_breaker: fetch_circuit(conn).await?,
            })
        })
    }
}
