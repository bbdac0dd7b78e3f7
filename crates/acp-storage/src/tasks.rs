//! Task creation and the read models

use acp_core::policy::clamp_int;
use acp_core::time::format_ts;
use acp_core::{
    events, new_task_id, Job, Priority, RiskProfile, Task, TaskDetail, TaskEvent, TaskSpec,
    TaskStatus, TaskStatusCounts, DEFAULT_BRANCH,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;
use turso::{params, Connection};

use crate::error::{Result, StoreError};
use crate::plans::fetch_plan;
use crate::rows::{
    append_event, fetch_circuit, fetch_decisions, fetch_emergency_stop, fetch_events,
    fetch_jobs_for_task, fetch_rollbacks, hydrate, parse_task_row, require_hydrated_task,
    require_task, task_status_list, to_u32, TASK_COLUMNS,
};
use crate::StateStore;

/// Largest page a listing returns
pub const MAX_LIST_LIMIT: u32 = 200;

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Caller metadata merged with the normalized keys
fn task_metadata(spec: &TaskSpec) -> Value {
    let mut metadata = match &spec.metadata {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    let rollback_available = spec
        .rollback_available
        .or_else(|| metadata.get("rollback_available").and_then(Value::as_bool))
        .unwrap_or(true);
    metadata.insert("rollback_available".into(), Value::Bool(rollback_available));
    metadata.insert(
        "source".into(),
        Value::String(trimmed(spec.source.as_deref()).unwrap_or("api").to_string()),
    );
    metadata.insert(
        "requested_by".into(),
        trimmed(spec.requested_by.as_deref())
            .map(|by| Value::String(by.to_string()))
            .unwrap_or(Value::Null),
    );
    Value::Object(metadata)
}

async fn query_tasks(
    conn: &Connection,
    query: &str,
    params_vec: Vec<turso::Value>,
) -> Result<Vec<Task>> {
    let mut rows = conn.query(query, params_vec).await?;
    let mut tasks = Vec::new();
    while let Some(row) = rows.next().await? {
        tasks.push(parse_task_row(&row)?);
    }
    drop(rows);

    let mut hydrated = Vec::with_capacity(tasks.len());
    for task in tasks {
        hydrated.push(hydrate(conn, task).await?);
    }
    Ok(hydrated)
}

impl StateStore {
    /// Validate, normalize and insert a new `queued` task.
    pub async fn create_task(&self, spec: &TaskSpec) -> Result<Task> {
        let goal = spec.goal.trim();
        if goal.is_empty() {
            return Err(StoreError::Validation("goal is required".into()));
        }
        let repo = spec.repo.trim();
        if repo.is_empty() {
            return Err(StoreError::Validation("repo is required".into()));
        }

        let branch = trimmed(spec.branch.as_deref()).unwrap_or(DEFAULT_BRANCH);
        let criteria = spec.normalized_criteria();
        let priority = Priority::normalize(spec.priority.as_deref());
        let risk_profile = RiskProfile::normalize(spec.risk_profile.as_deref());
        let parallelism = clamp_int(
            spec.parallelism_limit,
            1,
            10,
            i64::from(self.options.default_task_parallelism),
        );
        let metadata = task_metadata(spec);
        let task_id = new_task_id();
        let now = Utc::now();

        transactional!(self, |conn| {
            let ts = format_ts(now);
            conn.execute(
                &format!(
                    "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', ?, ?, 0, ?, ?, \
                     NULL, NULL, NULL)",
                    TASK_COLUMNS
                ),
                params![
                    task_id.as_str(),
                    goal,
                    repo,
                    branch,
                    serde_json::to_string(&criteria)?,
                    priority.as_str(),
                    risk_profile.as_str(),
                    parallelism,
                    serde_json::to_string(&metadata)?,
                    ts.clone(),
                    ts
                ],
            )
            .await?;

            append_event(
                conn,
                &task_id,
                events::TASK_CREATED,
                json!({
                    "goal": goal,
                    "repo": repo,
                    "branch": branch,
                    "priority": priority.as_str(),
                    "risk_profile": risk_profile.as_str(),
                    "source": metadata.get("source"),
                }),
                now,
            )
            .await?;

            info!(task_id = %task_id, repo = %repo, priority = %priority, "Task created");
            require_hydrated_task(conn, &task_id).await
        })
    }

    /// One task with its `dag_progress` counts
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        read_only!(self, |conn| { require_hydrated_task(conn, task_id).await })
    }

    /// Newest tasks first. `limit` is clamped to 1-200.
    pub async fn list_tasks(&self, limit: Option<u32>) -> Result<Vec<Task>> {
        let limit = clamp_int(
            limit.map(i64::from),
            1,
            i64::from(MAX_LIST_LIMIT),
            i64::from(self.options.list_limit_default),
        );
        read_only!(self, |conn| {
            let query = format!(
                "SELECT {} FROM tasks ORDER BY created_at DESC, task_id DESC LIMIT ?",
                TASK_COLUMNS
            );
            query_tasks(conn, &query, vec![limit.into()]).await
        })
    }

    /// Oldest tasks first among the given statuses
    pub async fn list_tasks_in_status(
        &self,
        statuses: &[TaskStatus],
        limit: Option<u32>,
    ) -> Result<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        read_only!(self, |conn| {
            let mut query = format!(
                "SELECT {} FROM tasks WHERE status IN ({}) ORDER BY created_at ASC, task_id ASC",
                TASK_COLUMNS,
                task_status_list(statuses)
            );
            if let Some(limit) = limit {
                query.push_str(&format!(" LIMIT {}", limit));
            }
            query_tasks(conn, &query, Vec::new()).await
        })
    }

    /// Task plus plan, jobs, audit trail and the current global controls
    pub async fn get_task_detail(&self, task_id: &str) -> Result<TaskDetail> {
        read_only!(self, |conn| {
            let task = require_hydrated_task(conn, task_id).await?;
            Ok(TaskDetail {
                plan: fetch_plan(conn, task_id).await?,
                jobs: fetch_jobs_for_task(conn, task_id).await?,
                events: fetch_events(conn, task_id, None).await?,
                decisions: fetch_decisions(conn, task_id).await?,
                rollbacks: fetch_rollbacks(conn, task_id).await?,
                controls: acp_core::SystemControls {
                    emergency_stop: fetch_emergency_stop(conn).await?,
                    circuit_breaker: fetch_circuit(conn).await?,
                },
                task,
            })
        })
    }

    /// Jobs of a task in plan order
    pub async fn list_jobs(&self, task_id: &str) -> Result<Vec<Job>> {
        read_only!(self, |conn| {
            require_task(conn, task_id).await?;
            fetch_jobs_for_task(conn, task_id).await
        })
    }

    /// Audit trail of a task, oldest first; `limit` keeps the newest entries
    pub async fn list_events(&self, task_id: &str, limit: Option<u32>) -> Result<Vec<TaskEvent>> {
        read_only!(self, |conn| {
            require_task(conn, task_id).await?;
            fetch_events(conn, task_id, limit).await
        })
    }

    /// Number of tasks in each status
    pub async fn task_status_counts(&self) -> Result<TaskStatusCounts> {
        read_only!(self, |conn| {
            let mut rows = conn
                .query("SELECT status, COUNT(*) FROM tasks GROUP BY status", params![])
                .await?;
            let mut counts = TaskStatusCounts::default();
            while let Some(row) = rows.next().await? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let status = status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?;
                counts.record(status, to_u32(count, "task count")?);
            }
            Ok(counts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let spec = TaskSpec::new("goal", "repo");
        let metadata = task_metadata(&spec);
        assert_eq!(metadata["rollback_available"], true);
        assert_eq!(metadata["source"], "api");
        assert!(metadata["requested_by"].is_null());
    }

    #[test]
    fn test_metadata_keeps_caller_keys() {
        let mut spec = TaskSpec::new("goal", "repo");
        spec.metadata = Some(json!({"ticket": "OPS-7", "rollback_available": false}));
        spec.requested_by = Some("  alice ".into());
        spec.source = Some("slack".into());
        let metadata = task_metadata(&spec);
        assert_eq!(metadata["ticket"], "OPS-7");
        assert_eq!(metadata["rollback_available"], false);
        assert_eq!(metadata["requested_by"], "alice");
        assert_eq!(metadata["source"], "slack");

        spec.rollback_available = Some(true);
        assert_eq!(task_metadata(&spec)["rollback_available"], true);
    }
}
