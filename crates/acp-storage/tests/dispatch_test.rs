//! Integration tests for dispatch limits, safety switches and controls
//!
//! Covers:
//! - Global and per-task parallelism caps
//! - Emergency stop blocking dispatch and claims
//! - Circuit breaker opening, gating release jobs, and reset
//! - Pause / resume / cancel / force rollback, including pauses before planning

use acp_core::{
    ControlRequest, ExecutionPlan, GlobalControlAction, JobStatus, PlanEdge, PlanNode, Task,
    TaskControlAction, TaskSpec, TaskStatus, WorkerResult,
};
use acp_planning::{build_execution_plan, PlanRequest, PlannerOptions};
use acp_storage::{StateStore, StoreOptions};
use serde_json::Value;
use std::collections::HashMap;
use tempfile::TempDir;

async fn create_test_store(options: StoreOptions) -> (StateStore, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = StateStore::open(dir.path().join("control-plane.db"), options)
        .await
        .expect("Failed to open store");
    (store, dir)
}

/// Plan with `count` independent coder nodes
fn flat_plan(count: usize, parallelism_limit: u32) -> ExecutionPlan {
    ExecutionPlan {
        parallelism_limit,
        nodes: (0..count)
            .map(|i| PlanNode {
                node_id: format!("part-{}", i),
                role: "coder".into(),
                timeout_s: 600,
                max_retries: 0,
                depends_on: vec![],
                payload: Value::Null,
            })
            .collect(),
        edges: vec![],
    }
}

/// Plan with a lone reviewer and a lone release node, both ready at once
fn critical_plan() -> ExecutionPlan {
    let node = |id: &str, role: &str| PlanNode {
        node_id: id.into(),
        role: role.into(),
        timeout_s: 600,
        max_retries: 0,
        depends_on: vec![],
        payload: Value::Null,
    };
    ExecutionPlan {
        parallelism_limit: 4,
        nodes: vec![node("reviewing", "reviewer"), node("releasing", "release")],
        edges: vec![PlanEdge {
            from: "reviewing".into(),
            to: "releasing".into(),
        }],
    }
}

async fn planned(store: &StateStore, goal: &str, plan: &ExecutionPlan) -> Task {
    let task = store.create_task(&TaskSpec::new(goal, "org/repo")).await.unwrap();
    store.attach_plan(&task.task_id, plan, None).await.unwrap()
}

#[tokio::test]
async fn test_dispatch_respects_global_and_task_limits() {
    let options = StoreOptions {
        global_parallelism: 3,
        ..StoreOptions::default()
    };
    let (store, _dir) = create_test_store(options).await;
    let first = planned(&store, "first", &flat_plan(4, 2)).await;
    let second = planned(&store, "second", &flat_plan(4, 2)).await;

    let ready = store.get_dispatchable_jobs(10).await.unwrap();
    assert_eq!(ready.len(), 3);
    let mut per_task: HashMap<&str, u32> = HashMap::new();
    for job in &ready {
        *per_task.entry(job.task_id.as_str()).or_default() += 1;
    }
    // Oldest task first, capped at its own limit
    assert_eq!(per_task.get(first.task_id.as_str()), Some(&2));
    assert_eq!(per_task.get(second.task_id.as_str()), Some(&1));

    let ids: Vec<String> = ready.iter().map(|job| job.job_id.clone()).collect();
    assert_eq!(store.dispatch_jobs(&ids, "tick").await.unwrap(), 3);
    // Second dispatch of the same ids is a no-op
    assert_eq!(store.dispatch_jobs(&ids, "tick").await.unwrap(), 0);

    // Global cap is full
    assert!(store.get_dispatchable_jobs(10).await.unwrap().is_empty());
    assert_eq!(store.system_snapshot().await.unwrap().active_jobs, 3);

    // The requested limit also bounds the result
    let (small, _dir2) = create_test_store(StoreOptions::default()).await;
    planned(&small, "third", &flat_plan(4, 4)).await;
    assert_eq!(small.get_dispatchable_jobs(1).await.unwrap().len(), 1);
    assert!(small.get_dispatchable_jobs(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_emergency_stop_blocks_dispatch_and_claims() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let task = store.create_task(&TaskSpec::new("goal", "org/repo")).await.unwrap();
    let plan = build_execution_plan(&PlanRequest::from(&task), &PlannerOptions::default());
    store.attach_plan(&task.task_id, &plan, None).await.unwrap();

    let ready = store.get_dispatchable_jobs(10).await.unwrap();
    assert!(!ready.is_empty());
    let ids: Vec<String> = ready.iter().map(|job| job.job_id.clone()).collect();
    assert_eq!(store.dispatch_jobs(&ids, "tick").await.unwrap(), 1);

    let controls = store
        .apply_global_control(
            GlobalControlAction::EmergencyStop,
            &ControlRequest::new("oncall", "incident"),
        )
        .await
        .unwrap();
    assert!(controls.emergency_stop.active);
    assert_eq!(controls.emergency_stop.by.as_deref(), Some("oncall"));

    assert!(store.get_dispatchable_jobs(10).await.unwrap().is_empty());
    assert!(store
        .claim_dispatched_jobs("worker-1", Some(5))
        .await
        .unwrap()
        .is_empty());

    let controls = store
        .apply_global_control(
            GlobalControlAction::EmergencyStopClear,
            &ControlRequest::default(),
        )
        .await
        .unwrap();
    assert!(!controls.emergency_stop.active);
    let claimed = store.claim_dispatched_jobs("worker-1", Some(5)).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].role, "coder");
    assert_eq!(claimed[0].payload["stage"], "coding");
}

#[tokio::test]
async fn test_claim_requires_worker_and_pins_owner() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let task = planned(&store, "goal", &flat_plan(1, 2)).await;

    let err = store.claim_dispatched_jobs("  ", None).await.unwrap_err();
    assert_eq!(err.code(), "validation_failed");

    let ready = store.get_dispatchable_jobs(10).await.unwrap();
    let job_id = ready[0].job_id.clone();
    store.dispatch_jobs(&[job_id.clone()], "tick").await.unwrap();
    let claimed = store.claim_dispatched_jobs("worker-a", None).await.unwrap();
    assert_eq!(claimed.len(), 1);
    // Already running: nothing left for anyone
    assert!(store
        .claim_dispatched_jobs("worker-b", None)
        .await
        .unwrap()
        .is_empty());

    let jobs = store.list_jobs(&task.task_id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Running);
    assert_eq!(jobs[0].worker_id.as_deref(), Some("worker-a"));
    assert!(jobs[0].started_at.is_some());
}

#[tokio::test]
async fn test_circuit_opens_and_gates_release_jobs() {
    let options = StoreOptions {
        circuit_threshold: 1,
        ..StoreOptions::default()
    };
    let (store, _dir) = create_test_store(options).await;
    let failing = planned(&store, "failing", &critical_plan()).await;

    let reviewer = store
        .list_jobs(&failing.task_id)
        .await
        .unwrap()
        .into_iter()
        .find(|job| job.role == "reviewer")
        .unwrap();
    store
        .dispatch_jobs(&[reviewer.job_id.clone()], "tick")
        .await
        .unwrap();
    store.claim_dispatched_jobs("worker-1", None).await.unwrap();
    let outcome = store
        .apply_worker_result(
            &WorkerResult::new(reviewer.job_id.as_str(), "timeout").from_worker("worker-1"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Timeout);
    assert_eq!(outcome.task.status, TaskStatus::Failed);

    let circuit = store.circuit_breaker().await.unwrap();
    assert!(circuit.is_open());
    assert_eq!(circuit.failure_count, 1);
    assert!(circuit.opened_at.is_some());

    // Another task's release job is held back, its reviewer is not
    let healthy = planned(&store, "healthy", &critical_plan()).await;
    let ready = store.get_dispatchable_jobs(10).await.unwrap();
    assert!(ready.iter().all(|job| job.task_id == healthy.task_id));
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].role, "reviewer");

    let controls = store
        .apply_global_control(GlobalControlAction::CircuitReset, &ControlRequest::default())
        .await
        .unwrap();
    assert!(!controls.circuit_breaker.is_open());
    assert_eq!(controls.circuit_breaker.failure_count, 0);
    assert_eq!(store.get_dispatchable_jobs(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rollback_unavailable_holds_release_jobs() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let mut spec = TaskSpec::new("goal", "org/repo");
    spec.rollback_available = Some(false);
    let task = store.create_task(&spec).await.unwrap();
    store
        .attach_plan(&task.task_id, &critical_plan(), None)
        .await
        .unwrap();

    let ready = store.get_dispatchable_jobs(10).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].role, "reviewer");
}

#[tokio::test]
async fn test_critical_success_resets_failure_count() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;

    // One terminal reviewer failure below the threshold
    let failing = planned(&store, "failing", &critical_plan()).await;
    let reviewer = store.list_jobs(&failing.task_id).await.unwrap()[0].clone();
    store
        .apply_worker_result(&WorkerResult::new(reviewer.job_id.as_str(), "failed"))
        .await
        .unwrap();
    assert_eq!(store.circuit_breaker().await.unwrap().failure_count, 1);

    let healthy = planned(&store, "healthy", &critical_plan()).await;
    let reviewer = store.list_jobs(&healthy.task_id).await.unwrap()[0].clone();
    store
        .apply_worker_result(&WorkerResult::new(reviewer.job_id.as_str(), "completed"))
        .await
        .unwrap();
    let circuit = store.circuit_breaker().await.unwrap();
    assert_eq!(circuit.failure_count, 0);
    assert!(!circuit.is_open());
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let task = planned(&store, "goal", &flat_plan(2, 2)).await;
    let request = ControlRequest::new("alice", "maintenance window");

    let paused = store
        .apply_task_control(&task.task_id, TaskControlAction::Pause, &request)
        .await
        .unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert!(store.get_dispatchable_jobs(10).await.unwrap().is_empty());

    // Paused tasks do not recompute
    let same = store.recompute_task_status(&task.task_id).await.unwrap();
    assert_eq!(same.status, TaskStatus::Paused);

    let resumed = store
        .apply_task_control(&task.task_id, TaskControlAction::Resume, &request)
        .await
        .unwrap();
    assert_eq!(resumed.status, TaskStatus::Running);
    assert_eq!(store.get_dispatchable_jobs(10).await.unwrap().len(), 2);

    let err = store
        .apply_task_control(&task.task_id, TaskControlAction::Resume, &request)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_transition");

    let detail = store.get_task_detail(&task.task_id).await.unwrap();
    let actions: Vec<&str> = detail
        .decisions
        .iter()
        .filter(|d| d.decision_type == "task_control_action")
        .filter_map(|d| d.payload["action"].as_str())
        .collect();
    assert_eq!(actions, vec!["pause", "resume"]);
}

#[tokio::test]
async fn test_resume_without_jobs_returns_to_queued() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let task = store.create_task(&TaskSpec::new("goal", "org/repo")).await.unwrap();
    let request = ControlRequest::new("alice", "hold");

    store
        .apply_task_control(&task.task_id, TaskControlAction::Pause, &request)
        .await
        .unwrap();
    let resumed = store
        .apply_task_control(&task.task_id, TaskControlAction::Resume, &request)
        .await
        .unwrap();
    assert_eq!(resumed.status, TaskStatus::Queued);
    assert_eq!(resumed.dag_progress.total, 0);

    // Back in the planner's hands
    assert!(store.begin_planning(&task.task_id).await.unwrap());

    let events = store.list_events(&task.task_id, None).await.unwrap();
    let resumed = events
        .iter()
        .find(|e| e.event_type == "task.resumed")
        .expect("resume event");
    assert_eq!(resumed.payload["status"], "queued");
}

#[tokio::test]
async fn test_plan_attached_while_paused_stays_paused() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let task = store.create_task(&TaskSpec::new("goal", "org/repo")).await.unwrap();
    assert!(store.begin_planning(&task.task_id).await.unwrap());
    let request = ControlRequest::new("alice", "hold");
    store
        .apply_task_control(&task.task_id, TaskControlAction::Pause, &request)
        .await
        .unwrap();

    // A planner that was already in flight finishes after the pause
    let attached = store
        .attach_plan(&task.task_id, &flat_plan(2, 2), None)
        .await
        .unwrap();
    assert_eq!(attached.status, TaskStatus::Paused);
    assert_eq!(attached.dag_progress.queued, 2);
    assert!(store.get_dispatchable_jobs(10).await.unwrap().is_empty());

    let resumed = store
        .apply_task_control(&task.task_id, TaskControlAction::Resume, &request)
        .await
        .unwrap();
    assert_eq!(resumed.status, TaskStatus::Running);
    assert_eq!(store.get_dispatchable_jobs(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_cancels_outstanding_jobs() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let task = store.create_task(&TaskSpec::new("goal", "org/repo")).await.unwrap();
    let plan = build_execution_plan(&PlanRequest::from(&task), &PlannerOptions::default());
    store.attach_plan(&task.task_id, &plan, None).await.unwrap();

    let canceled = store
        .apply_task_control(
            &task.task_id,
            TaskControlAction::Cancel,
            &ControlRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(canceled.status, TaskStatus::Canceled);
    assert_eq!(canceled.dag_progress.canceled, 4);
    assert!(canceled.completed_at.is_some());

    // Cancel again is a no-op, pause is refused
    let again = store
        .apply_task_control(
            &task.task_id,
            TaskControlAction::Cancel,
            &ControlRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(again.status, TaskStatus::Canceled);
    let err = store
        .apply_task_control(&task.task_id, TaskControlAction::Pause, &ControlRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_transition");
}

#[tokio::test]
async fn test_force_rollback_and_task_emergency_stop() {
    let (store, _dir) = create_test_store(StoreOptions::default()).await;
    let task = planned(&store, "goal", &flat_plan(3, 2)).await;

    let rolled_back = store
        .apply_task_control(
            &task.task_id,
            TaskControlAction::ForceRollback,
            &ControlRequest::new("bob", "bad migration"),
        )
        .await
        .unwrap();
    assert_eq!(rolled_back.status, TaskStatus::RolledBack);
    assert!(rolled_back.degraded);
    assert_eq!(rolled_back.dag_progress.canceled, 3);

    let detail = store.get_task_detail(&task.task_id).await.unwrap();
    assert_eq!(detail.rollbacks.len(), 1);
    assert_eq!(detail.rollbacks[0].trigger, "manual");
    assert_eq!(detail.rollbacks[0].canceled_jobs, 3);
    assert!(detail
        .decisions
        .iter()
        .any(|d| d.decision_type == "manual_rollback"));

    // A second rollback leaves a single record
    store
        .apply_task_control(
            &task.task_id,
            TaskControlAction::ForceRollback,
            &ControlRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(store.get_task_detail(&task.task_id).await.unwrap().rollbacks.len(), 1);

    let other = planned(&store, "other", &flat_plan(1, 1)).await;
    store
        .apply_task_control(
            &other.task_id,
            TaskControlAction::EmergencyStop,
            &ControlRequest::new("carol", "runaway agent"),
        )
        .await
        .unwrap();
    let stop = store.emergency_stop().await.unwrap();
    assert!(stop.active);
    assert_eq!(stop.reason.as_deref(), Some("runaway agent"));
    assert!(store.get_dispatchable_jobs(10).await.unwrap().is_empty());
}
