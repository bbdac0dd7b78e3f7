//! ACP Storage - the control plane's system of record
//!
//! Every piece of durable state lives here: tasks, plans, jobs, the audit
//! trail (events, decisions, rollbacks), the global circuit breaker and the
//! emergency stop flag. Other crates only touch state through [`StateStore`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │   Tick orchestrator / API handlers / CLI    │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │         ACP Storage (this crate)            │
//! │  • StateStore (one serialized connection)   │
//! │  • create / plan / unblock / recompute      │
//! │  • dispatch / claim / worker results        │
//! │  • rollback, circuit breaker, controls      │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │         turso database                      │
//! │  • .acp/control-plane.db (WAL)              │
//! │  • tasks, task_plans, jobs, task_events,    │
//! │    decision_records, rollback_records,      │
//! │    system_controls, circuit_breakers        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every mutating operation runs in a single transaction while holding the
//! connection lock, and each status change is a conditional update on the
//! expected status. Concurrent dispatch, claim and result reports therefore
//! apply at most once.
//!
//! # Example Usage
//!
//! ```no_run
//! use acp_core::{TaskSpec, WorkerResult};
//! use acp_storage::{StateStore, StoreOptions};
//!
//! # async fn example(plan: acp_core::ExecutionPlan) -> Result<(), Box<dyn std::error::Error>> {
//! let store = StateStore::open(".acp/control-plane.db", StoreOptions::default()).await?;
//!
//! let task = store.create_task(&TaskSpec::new("Fix login flake", "org/web")).await?;
//! store.attach_plan(&task.task_id, &plan, Some("initial plan")).await?;
//!
//! let ready = store.get_dispatchable_jobs(4).await?;
//! let ids: Vec<String> = ready.iter().map(|job| job.job_id.clone()).collect();
//! store.dispatch_jobs(&ids, "tick").await?;
//!
//! for job in store.claim_dispatched_jobs("worker-1", Some(4)).await? {
//!     let report = WorkerResult::new(job.job_id, "completed").from_worker("worker-1");
//!     store.apply_worker_result(&report).await?;
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod macros;

mod control;
mod dispatch;
pub mod error;
mod plans;
mod progress;
mod results;
mod rows;
mod safety;
mod schema;
mod store;
mod tasks;

pub use error::{Result, StoreError};
pub use safety::RollbackTrigger;
pub use store::{StateStore, StoreOptions};
pub use tasks::MAX_LIST_LIMIT;
