//! Row decoding and the small queries every operation shares.
//!
//! Helpers here take a plain `&Connection` so they run equally inside a
//! transaction (via deref) or on the bare connection for reads.

use acp_core::time::{format_ts, parse_ts};
use acp_core::{
    CircuitBreakerState, CircuitStatus, DagProgress, DecisionRecord, EmergencyStop, Job,
    JobStatus, Priority, RiskProfile, RollbackRecord, Task, TaskEvent, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use turso::{params, Connection, Row};

use crate::error::{Result, StoreError};
use crate::schema::{EMERGENCY_STOP_KEY, GLOBAL_SCOPE};

pub(crate) const TASK_COLUMNS: &str = "task_id, goal, repo, branch, acceptance_criteria, \
     priority, risk_profile, status, parallelism_limit, metadata, degraded, created_at, \
     updated_at, started_at, completed_at, failed_reason";

pub(crate) const JOB_COLUMNS: &str = "job_id, task_id, node_id, role, payload, timeout_s, \
     max_retries, attempt, status, worker_id, depends_on, next_run_at, last_error, artifacts, \
     logs, metrics, created_at, updated_at, started_at, completed_at";

/// Column list with every column prefixed by a table alias
pub(crate) fn qualified(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|column| format!("{}.{}", alias, column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `'a', 'b'` list for a status `IN (...)` clause
pub(crate) fn status_list(statuses: &[JobStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn task_status_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} out of range: {}", column, value)))
}

pub(crate) fn parse_json(raw: &str) -> Result<Value> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(raw)?)
}

fn parse_required_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(parse_ts(raw)?)
}

fn parse_optional_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_required_ts).transpose()
}

pub(crate) fn parse_task_row(row: &Row) -> Result<Task> {
    let criteria_json: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let risk: String = row.get(6)?;
    let status: String = row.get(7)?;
    let parallelism: i64 = row.get(8)?;
    let metadata_json: String = row.get(9)?;
    let degraded: i64 = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Task {
        task_id: row.get(0)?,
        goal: row.get(1)?,
        repo: row.get(2)?,
        branch: row.get(3)?,
        acceptance_criteria: serde_json::from_str(&criteria_json)?,
        priority: priority.parse::<Priority>().map_err(StoreError::Corrupt)?,
        risk_profile: risk.parse::<RiskProfile>().map_err(StoreError::Corrupt)?,
        status: status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?,
        parallelism_limit: to_u32(parallelism, "parallelism_limit")?,
        metadata: parse_json(&metadata_json)?,
        degraded: degraded != 0,
        created_at: parse_required_ts(&created_at)?,
        updated_at: parse_required_ts(&updated_at)?,
        started_at: parse_optional_ts(row.get(13)?)?,
        completed_at: parse_optional_ts(row.get(14)?)?,
        failed_reason: row.get(15)?,
        dag_progress: DagProgress::default(),
    })
}

pub(crate) fn parse_job_row(row: &Row) -> Result<Job> {
    let payload: String = row.get(4)?;
    let timeout_s: i64 = row.get(5)?;
    let max_retries: i64 = row.get(6)?;
    let attempt: i64 = row.get(7)?;
    let status: String = row.get(8)?;
    let depends_on: String = row.get(10)?;
    let artifacts: String = row.get(13)?;
    let logs: String = row.get(14)?;
    let metrics: String = row.get(15)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;

    Ok(Job {
        job_id: row.get(0)?,
        task_id: row.get(1)?,
        node_id: row.get(2)?,
        role: row.get(3)?,
        payload: parse_json(&payload)?,
        timeout_s: u64::from(to_u32(timeout_s, "timeout_s")?),
        max_retries: to_u32(max_retries, "max_retries")?,
        attempt: to_u32(attempt, "attempt")?,
        status: status.parse::<JobStatus>().map_err(StoreError::Corrupt)?,
        worker_id: row.get(9)?,
        depends_on: serde_json::from_str(&depends_on)?,
        next_run_at: parse_optional_ts(row.get(11)?)?,
        last_error: row.get(12)?,
        artifacts: parse_json(&artifacts)?,
        logs: parse_json(&logs)?,
        metrics: parse_json(&metrics)?,
        created_at: parse_required_ts(&created_at)?,
        updated_at: parse_required_ts(&updated_at)?,
        started_at: parse_optional_ts(row.get(18)?)?,
        completed_at: parse_optional_ts(row.get(19)?)?,
    })
}

pub(crate) async fn fetch_task(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let query = format!("SELECT {} FROM tasks WHERE task_id = ?", TASK_COLUMNS);
    let mut rows = conn.query(&query, params![task_id]).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(parse_task_row(&row)?)),
        None => Ok(None),
    }
}

pub(crate) async fn require_task(conn: &Connection, task_id: &str) -> Result<Task> {
    fetch_task(conn, task_id)
        .await?
        .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
}

/// Fill in `dag_progress` from the task's current jobs
pub(crate) async fn hydrate(conn: &Connection, mut task: Task) -> Result<Task> {
    let mut rows = conn
        .query(
            "SELECT status, COUNT(*) FROM jobs WHERE task_id = ? GROUP BY status",
            params![task.task_id.as_str()],
        )
        .await?;

    let mut progress = DagProgress::default();
    while let Some(row) = rows.next().await? {
        let status: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        let status = status.parse::<JobStatus>().map_err(StoreError::Corrupt)?;
        progress.record(status, to_u32(count, "job count")?);
    }
    task.dag_progress = progress;
    Ok(task)
}

pub(crate) async fn require_hydrated_task(conn: &Connection, task_id: &str) -> Result<Task> {
    let task = require_task(conn, task_id).await?;
    hydrate(conn, task).await
}

pub(crate) async fn fetch_job(conn: &Connection, job_id: &str) -> Result<Option<Job>> {
    let query = format!("SELECT {} FROM jobs WHERE job_id = ?", JOB_COLUMNS);
    let mut rows = conn.query(&query, params![job_id]).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(parse_job_row(&row)?)),
        None => Ok(None),
    }
}

pub(crate) async fn require_job(conn: &Connection, job_id: &str) -> Result<Job> {
    fetch_job(conn, job_id)
        .await?
        .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
}

/// All jobs of a task in plan order
pub(crate) async fn fetch_jobs_for_task(conn: &Connection, task_id: &str) -> Result<Vec<Job>> {
    let query = format!(
        "SELECT {} FROM jobs WHERE task_id = ? ORDER BY position ASC",
        JOB_COLUMNS
    );
    let mut rows = conn.query(&query, params![task_id]).await?;
    let mut jobs = Vec::new();
    while let Some(row) = rows.next().await? {
        jobs.push(parse_job_row(&row)?);
    }
    Ok(jobs)
}

pub(crate) async fn count_rows(
    conn: &Connection,
    query: &str,
    params_vec: Vec<turso::Value>,
) -> Result<u32> {
    let mut rows = conn.query(query, params_vec).await?;
    match rows.next().await? {
        Some(row) => {
            let count: i64 = row.get(0)?;
            to_u32(count, "count")
        }
        None => Ok(0),
    }
}

/// Jobs holding a worker slot, globally or for one task
pub(crate) async fn count_active_jobs(conn: &Connection, task_id: Option<&str>) -> Result<u32> {
    let active = status_list(&JobStatus::SLOT_HOLDING);
    match task_id {
        Some(task_id) => {
            let query = format!(
                "SELECT COUNT(*) FROM jobs WHERE task_id = ? AND status IN ({})",
                active
            );
            count_rows(conn, &query, vec![task_id.to_string().into()]).await
        }
        None => {
            let query = format!("SELECT COUNT(*) FROM jobs WHERE status IN ({})", active);
            count_rows(conn, &query, Vec::new()).await
        }
    }
}

pub(crate) async fn append_event(
    conn: &Connection,
    task_id: &str,
    event_type: &str,
    payload: Value,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO task_events (task_id, event_type, payload, ts) VALUES (?, ?, ?, ?)",
        params![
            task_id,
            event_type,
            serde_json::to_string(&payload)?,
            format_ts(now)
        ],
    )
    .await?;
    Ok(())
}

pub(crate) async fn append_decision(
    conn: &Connection,
    task_id: Option<&str>,
    decision_type: &str,
    payload: Value,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO decision_records (task_id, decision_type, payload, created_at) VALUES (?, ?, ?, ?)",
        params![
            task_id.map(str::to_string),
            decision_type,
            serde_json::to_string(&payload)?,
            format_ts(now)
        ],
    )
    .await?;
    Ok(())
}

pub(crate) async fn fetch_events(
    conn: &Connection,
    task_id: &str,
    limit: Option<u32>,
) -> Result<Vec<TaskEvent>> {
    // fetched newest-first so a limit keeps the most recent entries
    let mut query = String::from(
        "SELECT id, task_id, event_type, payload, ts FROM task_events \
         WHERE task_id = ? ORDER BY id DESC",
    );
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {}", limit));
    }
    let mut rows = conn.query(&query, params![task_id]).await?;
    let mut events = Vec::new();
    while let Some(row) = rows.next().await? {
        let payload: String = row.get(3)?;
        let ts: String = row.get(4)?;
        events.push(TaskEvent {
            id: row.get(0)?,
            task_id: row.get(1)?,
            event_type: row.get(2)?,
            payload: parse_json(&payload)?,
            ts: parse_required_ts(&ts)?,
        });
    }
    events.reverse();
    Ok(events)
}

pub(crate) async fn fetch_decisions(conn: &Connection, task_id: &str) -> Result<Vec<DecisionRecord>> {
    let mut rows = conn
        .query(
            "SELECT id, task_id, decision_type, payload, created_at FROM decision_records \
             WHERE task_id = ? ORDER BY id ASC",
            params![task_id],
        )
        .await?;
    let mut decisions = Vec::new();
    while let Some(row) = rows.next().await? {
        let payload: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        decisions.push(DecisionRecord {
            id: row.get(0)?,
            task_id: row.get(1)?,
            decision_type: row.get(2)?,
            payload: parse_json(&payload)?,
            created_at: parse_required_ts(&created_at)?,
        });
    }
    Ok(decisions)
}

pub(crate) async fn fetch_rollbacks(conn: &Connection, task_id: &str) -> Result<Vec<RollbackRecord>> {
    let mut rows = conn
        .query(
            "SELECT id, task_id, trigger_kind, reason, canceled_jobs, payload, created_at \
             FROM rollback_records WHERE task_id = ? ORDER BY id ASC",
            params![task_id],
        )
        .await?;
    let mut rollbacks = Vec::new();
    while let Some(row) = rows.next().await? {
        let canceled: i64 = row.get(4)?;
        let payload: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        rollbacks.push(RollbackRecord {
            id: row.get(0)?,
            task_id: row.get(1)?,
            trigger: row.get(2)?,
            reason: row.get(3)?,
            canceled_jobs: to_u32(canceled, "canceled_jobs")?,
            payload: parse_json(&payload)?,
            created_at: parse_required_ts(&created_at)?,
        });
    }
    Ok(rollbacks)
}

pub(crate) async fn fetch_circuit(conn: &Connection) -> Result<CircuitBreakerState> {
    let mut rows = conn
        .query(
            "SELECT scope, status, failure_count, threshold, opened_at, reason, updated_at \
             FROM circuit_breakers WHERE scope = ?",
            params![GLOBAL_SCOPE],
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| StoreError::Corrupt("circuit breaker row missing".into()))?;

    let status: String = row.get(1)?;
    let failure_count: i64 = row.get(2)?;
    let threshold: i64 = row.get(3)?;
    let updated_at: String = row.get(6)?;
    Ok(CircuitBreakerState {
        scope: row.get(0)?,
        status: status.parse::<CircuitStatus>().map_err(StoreError::Corrupt)?,
        failure_count: to_u32(failure_count, "failure_count")?,
        threshold: to_u32(threshold, "threshold")?,
        opened_at: parse_optional_ts(row.get(4)?)?,
        reason: row.get(5)?,
        updated_at: parse_required_ts(&updated_at)?,
    })
}

pub(crate) async fn fetch_emergency_stop(conn: &Connection) -> Result<EmergencyStop> {
    let mut rows = conn
        .query(
            "SELECT value FROM system_controls WHERE key = ?",
            params![EMERGENCY_STOP_KEY],
        )
        .await?;
    match rows.next().await? {
        Some(row) => {
            let value: String = row.get(0)?;
            Ok(serde_json::from_str(&value)?)
        }
        None => Ok(EmergencyStop::default()),
    }
}

pub(crate) async fn store_emergency_stop(
    conn: &Connection,
    stop: &EmergencyStop,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO system_controls (key, value, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![EMERGENCY_STOP_KEY, serde_json::to_string(stop)?, format_ts(now)],
    )
    .await?;
    Ok(())
}
