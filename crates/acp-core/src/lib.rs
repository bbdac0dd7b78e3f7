//! # acp-core
//!
//! Core types for the agent control plane.
//!
//! A task is decomposed into a fixed pipeline of jobs (code, test, review,
//! release) that pull-based workers claim and report on. This crate holds the
//! vocabulary every other crate speaks:
//!
//! - Task, job and plan records plus their lifecycle enums
//! - Audit records (events, decisions, rollbacks) and global controls
//! - The pure risk policy (critical roles, high-risk gating, retry backoff)
//! - Control plane configuration loaded from TOML

mod config;
mod control;
mod error;
pub mod lifecycle;
mod model;
pub mod policy;
mod status;
pub mod time;

pub use config::ControlPlaneConfig;
pub use control::{
    ControlRequest, GlobalControlAction, SystemControls, SystemSnapshot, TaskControlAction,
    TaskStatusCounts,
};
pub use error::{AcpError, Result};
pub use lifecycle::{derive_phase, PhaseDecision};
pub use model::*;
pub use status::*;

/// Well-known job roles produced by the planner
pub mod roles {
    pub const CODER: &str = "coder";
    pub const TESTER: &str = "tester";
    pub const REVIEWER: &str = "reviewer";
    pub const RELEASE: &str = "release";
}

/// Event types written to the task audit trail
pub mod events {
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_PLANNING: &str = "task.planning";
    pub const TASK_PLANNED: &str = "task.planned";
    pub const TASK_PHASE_CHANGED: &str = "task.phase_changed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_DONE: &str = "task.done";
    pub const TASK_ROLLED_BACK: &str = "task.rolled_back";
    pub const TASK_PAUSED: &str = "task.paused";
    pub const TASK_RESUMED: &str = "task.resumed";
    pub const TASK_CANCELED: &str = "task.canceled";
    pub const TASK_EMERGENCY_STOP: &str = "task.emergency_stop";
    pub const JOB_UNBLOCKED: &str = "job.unblocked";
    pub const JOB_DISPATCHED: &str = "job.dispatched";
    pub const JOB_RUNNING: &str = "job.running";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";
}

/// Decision types written to the decision log
pub mod decisions {
    pub const PLAN_CREATED: &str = "plan_created";
    pub const OPEN_CIRCUIT_BREAKER: &str = "open_circuit_breaker";
    pub const AUTO_ROLLBACK: &str = "auto_rollback";
    pub const MANUAL_ROLLBACK: &str = "manual_rollback";
    pub const TASK_CONTROL_ACTION: &str = "task_control_action";
}
