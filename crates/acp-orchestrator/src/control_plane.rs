//! The control plane facade used by the binary and API handlers

use std::sync::Arc;
use std::time::Duration;

use acp_core::{
    ClaimedJob, ControlPlaneConfig, ControlRequest, GlobalControlAction, SystemControls,
    SystemSnapshot, Task, TaskControlAction, TaskDetail, TaskSpec, TaskStatusCounts,
    WorkerResult, WorkerResultOutcome,
};
use acp_storage::{Result, StateStore, StoreError, StoreOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::tick::{TickOptions, TickSummary};
use crate::ticker::TickRunner;

/// Health report: last tick, live system state and task counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    pub ticking: bool,
    pub last_tick: Option<TickSummary>,
    pub snapshot: SystemSnapshot,
    pub task_counts: TaskStatusCounts,
}

/// Owns the store and the tick runner.
///
/// # Example
///
/// ```no_run
/// use acp_core::{ControlPlaneConfig, TaskSpec};
/// use acp_orchestrator::ControlPlane;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let plane = ControlPlane::open(ControlPlaneConfig::default()).await?;
/// let task = plane.create_task(&TaskSpec::new("Add retry header", "org/api")).await?;
/// plane.tick().await?;
/// println!("{}", plane.store().get_task(&task.task_id).await?.status);
/// # Ok(())
/// # }
/// ```
pub struct ControlPlane {
    config: ControlPlaneConfig,
    store: Arc<StateStore>,
    ticker: TickRunner<StateStore>,
}

impl ControlPlane {
    /// Open the store named by `config` and prepare the tick runner
    pub async fn open(config: ControlPlaneConfig) -> Result<Self> {
        let store = StateStore::open(&config.database_path, StoreOptions::from(&config)).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: ControlPlaneConfig, store: Arc<StateStore>) -> Self {
        let ticker = TickRunner::new(Arc::clone(&store), TickOptions::from(&config));
        Self {
            config,
            store,
            ticker,
        }
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn ticker(&self) -> &TickRunner<StateStore> {
        &self.ticker
    }

    /// Run one tick now; `None` when a tick is already in flight
    pub async fn tick(&self) -> Result<Option<TickSummary>> {
        self.ticker.try_tick().await
    }

    /// Drive ticks on the configured interval until `shutdown` fires
    pub async fn run_until(&self, shutdown: mpsc::Receiver<()>) {
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        self.ticker.run_until(period, shutdown).await;
        info!("Control plane stopped");
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let last_tick = self.ticker.last_summary().await;
        let queue_depth = last_tick.as_ref().map_or(0, |tick| tick.queue_depth);
        let snapshot = self.store.system_snapshot().await?.with_queue_depth(queue_depth);
        let task_counts = self.store.task_status_counts().await?;
        Ok(HealthReport {
            ok: !snapshot.emergency_stop.active && !snapshot.circuit_breaker.is_open(),
            ticking: self.ticker.is_ticking(),
            last_tick,
            snapshot,
            task_counts,
        })
    }

    pub async fn create_task(&self, spec: &TaskSpec) -> Result<Task> {
        self.store.create_task(spec).await
    }

    pub async fn list_tasks(&self, limit: Option<u32>) -> Result<Vec<Task>> {
        self.store.list_tasks(limit).await
    }

    pub async fn task_detail(&self, task_id: &str) -> Result<TaskDetail> {
        self.store.get_task_detail(task_id).await
    }

    /// Apply a task action given by name, e.g. `"pause"`
    pub async fn control_task(
        &self,
        task_id: &str,
        action: &str,
        request: &ControlRequest,
    ) -> Result<Task> {
        let action: TaskControlAction = action.parse().map_err(StoreError::InvalidControl)?;
        self.store.apply_task_control(task_id, action, request).await
    }

    /// Apply a system-wide action given by name, e.g. `"circuit_reset"`
    pub async fn control_system(
        &self,
        action: &str,
        request: &ControlRequest,
    ) -> Result<SystemControls> {
        let action: GlobalControlAction = action.parse().map_err(StoreError::InvalidControl)?;
        self.store.apply_global_control(action, request).await
    }

    pub async fn claim_jobs(&self, worker_id: &str, limit: Option<u32>) -> Result<Vec<ClaimedJob>> {
        self.store.claim_dispatched_jobs(worker_id, limit).await
    }

    pub async fn report_result(&self, result: &WorkerResult) -> Result<WorkerResultOutcome> {
        self.store.apply_worker_result(result).await
    }
}
