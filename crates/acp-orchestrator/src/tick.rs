//! One orchestration tick: plan, unblock, admit, dispatch
//!
//! The tick never holds state of its own. Every step is a call into the
//! store, so a tick racing with worker claims or result reports is safe as
//! long as the store's operations are.

use acp_core::{ControlPlaneConfig, ExecutionPlan, Job, SystemSnapshot, Task, TaskStatus};
use acp_planning::{build_execution_plan, PlanRequest, PlannerOptions};
use acp_storage::{Result, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chief::{decide_dispatch_limit, ChiefOptions};

/// Task statuses that still need a plan
const UNPLANNED: [TaskStatus; 2] = [TaskStatus::Queued, TaskStatus::Planning];

/// Task statuses whose blocked jobs may become ready
const UNBLOCKABLE: [TaskStatus; 4] = [
    TaskStatus::Running,
    TaskStatus::Reviewing,
    TaskStatus::Releasing,
    TaskStatus::Planning,
];

/// The store operations a tick needs.
///
/// Implemented by [`StateStore`]; tests substitute their own.
#[async_trait]
pub trait TickStore: Send + Sync {
    async fn list_tasks_in_status(
        &self,
        statuses: &[TaskStatus],
        limit: Option<u32>,
    ) -> Result<Vec<Task>>;

    async fn begin_planning(&self, task_id: &str) -> Result<bool>;

    async fn attach_plan(
        &self,
        task_id: &str,
        plan: &ExecutionPlan,
        reason: Option<&str>,
    ) -> Result<Task>;

    async fn unblock_ready_jobs(&self, task_id: &str) -> Result<u32>;

    async fn system_snapshot(&self) -> Result<SystemSnapshot>;

    async fn get_dispatchable_jobs(&self, limit: u32) -> Result<Vec<Job>>;

    async fn dispatch_jobs(&self, job_ids: &[String], dispatcher_id: &str) -> Result<u32>;
}

#[async_trait]
impl TickStore for StateStore {
    async fn list_tasks_in_status(
        &self,
        statuses: &[TaskStatus],
        limit: Option<u32>,
    ) -> Result<Vec<Task>> {
        StateStore::list_tasks_in_status(self, statuses, limit).await
    }

    async fn begin_planning(&self, task_id: &str) -> Result<bool> {
        StateStore::begin_planning(self, task_id).await
    }

    async fn attach_plan(
        &self,
        task_id: &str,
        plan: &ExecutionPlan,
        reason: Option<&str>,
    ) -> Result<Task> {
        StateStore::attach_plan(self, task_id, plan, reason).await
    }

    async fn unblock_ready_jobs(&self, task_id: &str) -> Result<u32> {
        StateStore::unblock_ready_jobs(self, task_id).await
    }

    async fn system_snapshot(&self) -> Result<SystemSnapshot> {
        StateStore::system_snapshot(self).await
    }

    async fn get_dispatchable_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        StateStore::get_dispatchable_jobs(self, limit).await
    }

    async fn dispatch_jobs(&self, job_ids: &[String], dispatcher_id: &str) -> Result<u32> {
        StateStore::dispatch_jobs(self, job_ids, dispatcher_id).await
    }
}

/// Knobs for a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOptions {
    /// Tasks planned per tick
    pub planning_batch: u32,
    pub chief: ChiefOptions,
    pub planner: PlannerOptions,
    /// Recorded on every `job.dispatched` event
    pub dispatcher_id: String,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self::from(&ControlPlaneConfig::default())
    }
}

impl From<&ControlPlaneConfig> for TickOptions {
    fn from(config: &ControlPlaneConfig) -> Self {
        Self {
            planning_batch: config.planning_batch.max(1),
            chief: ChiefOptions {
                max_parallelism: Some(i64::from(config.max_parallelism)),
            },
            planner: PlannerOptions {
                parallelism_limit: Some(i64::from(config.default_task_parallelism)),
            },
            dispatcher_id: "control-plane-tick".to_string(),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub planned: u32,
    pub unblocked: u32,
    pub dispatched: u32,
    pub queue_depth: u32,
    pub dispatch_limit: u32,
    pub snapshot: SystemSnapshot,
    pub finished_at: DateTime<Utc>,
}

async fn plan_pending<S: TickStore + ?Sized>(store: &S, opts: &TickOptions) -> Result<u32> {
    let pending = store
        .list_tasks_in_status(&UNPLANNED, Some(opts.planning_batch))
        .await?;

    let mut planned = 0;
    for task in pending {
        if task.status == TaskStatus::Queued && !store.begin_planning(&task.task_id).await? {
            debug!(task_id = %task.task_id, "Task left the queue before planning");
            continue;
        }

        let plan = build_execution_plan(&PlanRequest::from(&task), &opts.planner);
        match store
            .attach_plan(&task.task_id, &plan, Some("planned by control plane tick"))
            .await
        {
            Ok(_) => planned += 1,
            Err(e) if e.is_client_error() => {
                warn!(task_id = %task.task_id, "Skipping plan: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(planned)
}

/// Run one orchestration tick against `store`.
///
/// 1. Plan up to `planning_batch` queued or planning tasks, oldest first.
/// 2. Unblock ready jobs of every running, reviewing, releasing or planning task.
/// 3. Total the queued jobs of those tasks as the queue depth.
/// 4. Ask the chief for a dispatch limit against a fresh system snapshot.
/// 5. Dispatch up to that many jobs.
pub async fn process_control_plane_tick<S: TickStore + ?Sized>(
    store: &S,
    opts: &TickOptions,
) -> Result<TickSummary> {
    let planned = plan_pending(store, opts).await?;

    let active = store.list_tasks_in_status(&UNBLOCKABLE, None).await?;
    let mut unblocked = 0;
    let mut queue_depth = 0;
    for task in &active {
        unblocked += store.unblock_ready_jobs(&task.task_id).await?;
        queue_depth += task.dag_progress.queued;
    }
    // Counts were loaded before unblocking
    queue_depth += unblocked;

    let snapshot = store.system_snapshot().await?.with_queue_depth(queue_depth);
    let dispatch_limit = decide_dispatch_limit(&snapshot, &opts.chief);

    let mut dispatched = 0;
    if dispatch_limit > 0 {
        let ready = store.get_dispatchable_jobs(dispatch_limit).await?;
        if !ready.is_empty() {
            let ids: Vec<String> = ready.into_iter().map(|job| job.job_id).collect();
            dispatched = store.dispatch_jobs(&ids, &opts.dispatcher_id).await?;
        }
    }

    let summary = TickSummary {
        planned,
        unblocked,
        dispatched,
        queue_depth,
        dispatch_limit,
        snapshot,
        finished_at: Utc::now(),
    };
    if planned > 0 || unblocked > 0 || dispatched > 0 {
        info!(
            planned,
            unblocked, dispatched, queue_depth, dispatch_limit, "Control plane tick"
        );
    } else {
        debug!(queue_depth, dispatch_limit, "Idle control plane tick");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_config() {
        let config = ControlPlaneConfig {
            planning_batch: 3,
            max_parallelism: 4,
            default_task_parallelism: 2,
            ..ControlPlaneConfig::default()
        };
        let opts = TickOptions::from(&config);
        assert_eq!(opts.planning_batch, 3);
        assert_eq!(opts.chief.configured_max(), 4);
        assert_eq!(opts.planner.parallelism_limit, Some(2));
    }
}
