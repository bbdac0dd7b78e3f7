//! ACP Planning - task to execution plan decomposition
//!
//! This crate turns a task description into the fixed four-stage job DAG
//! (code, test, review, release) the control plane schedules. Planning is
//! pure and deterministic: the same request always yields the same plan.

pub mod planner;
pub mod stages;

pub use planner::{build_execution_plan, PlanRequest, PlannerOptions};
pub use stages::{StageTemplate, STAGES};
