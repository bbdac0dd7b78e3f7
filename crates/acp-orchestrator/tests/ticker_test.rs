//! Tests for the single-flight tick runner using a mock store

use acp_core::{
    CircuitBreakerState, CircuitStatus, EmergencyStop, ExecutionPlan, Job, SystemSnapshot, Task,
    TaskStatus,
};
use acp_orchestrator::{TickOptions, TickRunner, TickStore};
use acp_storage::{Result, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Store with no tasks whose snapshot can be held open to simulate a slow tick
#[derive(Default)]
struct MockStore {
    hold: AtomicBool,
    fail: AtomicBool,
    entered: Notify,
    release: Notify,
    snapshots: AtomicU32,
}

#[async_trait]
impl TickStore for MockStore {
    async fn list_tasks_in_status(
        &self,
        _statuses: &[TaskStatus],
        _limit: Option<u32>,
    ) -> Result<Vec<Task>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("mock failure".into()));
        }
        Ok(Vec::new())
    }

    async fn begin_planning(&self, _task_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn attach_plan(
        &self,
        task_id: &str,
        _plan: &ExecutionPlan,
        _reason: Option<&str>,
    ) -> Result<Task> {
        Err(StoreError::TaskNotFound(task_id.to_string()))
    }

    async fn unblock_ready_jobs(&self, _task_id: &str) -> Result<u32> {
        Ok(0)
    }

    async fn system_snapshot(&self) -> Result<SystemSnapshot> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(SystemSnapshot {
            emergency_stop: EmergencyStop::default(),
            circuit_breaker: CircuitBreakerState {
                scope: "global".to_string(),
                status: CircuitStatus::Closed,
                failure_count: 0,
                threshold: 3,
                opened_at: None,
                reason: None,
                updated_at: Utc::now(),
            },
            active_jobs: 0,
            queue_depth: 0,
        })
    }

    async fn get_dispatchable_jobs(&self, _limit: u32) -> Result<Vec<Job>> {
        Ok(Vec::new())
    }

    async fn dispatch_jobs(&self, _job_ids: &[String], _dispatcher_id: &str) -> Result<u32> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let store = Arc::new(MockStore::default());
    store.hold.store(true, Ordering::SeqCst);
    let runner = Arc::new(TickRunner::new(Arc::clone(&store), TickOptions::default()));

    let slow = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.try_tick().await })
    };
    store.entered.notified().await;
    assert!(runner.is_ticking());

    let skipped = runner.try_tick().await.unwrap();
    assert!(skipped.is_none());
    assert_eq!(store.snapshots.load(Ordering::SeqCst), 1);

    store.hold.store(false, Ordering::SeqCst);
    store.release.notify_one();
    let finished = slow.await.unwrap().unwrap();
    assert!(finished.is_some());
    assert!(!runner.is_ticking());

    // The flag is clear again, so the next tick runs
    assert!(runner.try_tick().await.unwrap().is_some());
    assert_eq!(store.snapshots.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_tick_releases_flag() {
    let store = Arc::new(MockStore::default());
    store.fail.store(true, Ordering::SeqCst);
    let runner = TickRunner::new(Arc::clone(&store), TickOptions::default());

    assert!(runner.try_tick().await.is_err());
    assert!(!runner.is_ticking());
    assert!(runner.last_summary().await.is_none());

    store.fail.store(false, Ordering::SeqCst);
    let summary = runner.try_tick().await.unwrap().expect("tick should run");
    // idle fleet, empty queue
    assert_eq!(summary.dispatch_limit, 2);
    assert_eq!(runner.last_summary().await, Some(summary));
}

#[tokio::test]
async fn test_run_until_ticks_and_stops() {
    let store = Arc::new(MockStore::default());
    let runner = Arc::new(TickRunner::new(Arc::clone(&store), TickOptions::default()));
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let handle = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            runner
                .run_until(Duration::from_millis(10), shutdown_rx)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop")
        .unwrap();

    assert!(store.snapshots.load(Ordering::SeqCst) >= 1);
    assert!(runner.last_summary().await.is_some());
}
