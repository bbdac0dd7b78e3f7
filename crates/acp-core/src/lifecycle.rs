//! Pure derivation of a task's phase from its jobs
//!
//! No I/O. The store loads a task's jobs, asks [`derive_phase`] what the task
//! should be, and applies the answer. Frozen tasks (terminal or paused) are
//! never passed through here.
//!
//! Rule order, first match wins:
//! 1. a release job failed or timed out: roll the task back
//! 2. any other job failed, timed out or was canceled: the task failed
//! 3. every job completed: the task is done
//! 4. otherwise the task is running, upgraded to releasing or reviewing when a
//!    release or reviewer job is still outstanding (blocked included)

use crate::model::Job;
use crate::roles;
use crate::status::{JobStatus, TaskStatus};

/// What a task's jobs say its status should be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseDecision {
    /// Terminal release failure
    RollBack { job_id: String, reason: String },
    /// Terminal non-release failure
    Fail { job_id: String, reason: String },
    /// All jobs completed
    Done,
    /// Still in progress, in the given phase
    Active(TaskStatus),
}

impl PhaseDecision {
    /// Status the task lands in
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::RollBack { .. } => TaskStatus::RolledBack,
            Self::Fail { .. } => TaskStatus::Failed,
            Self::Done => TaskStatus::Done,
            Self::Active(status) => *status,
        }
    }
}

fn has_role(job: &Job, role: &str) -> bool {
    job.role.trim().eq_ignore_ascii_case(role)
}

fn failure_reason(job: &Job) -> String {
    match &job.last_error {
        Some(error) if !error.trim().is_empty() => error.clone(),
        _ => format!("job {} ({}) ended {}", job.node_id, job.role, job.status),
    }
}

/// Derive the phase of a task from its jobs.
///
/// Returns `None` for a task with no jobs; such a task keeps its status.
pub fn derive_phase(jobs: &[Job]) -> Option<PhaseDecision> {
    if jobs.is_empty() {
        return None;
    }

    if let Some(job) = jobs.iter().find(|job| {
        has_role(job, roles::RELEASE)
            && matches!(job.status, JobStatus::Failed | JobStatus::Timeout)
    }) {
        return Some(PhaseDecision::RollBack {
            job_id: job.job_id.clone(),
            reason: failure_reason(job),
        });
    }

    if let Some(job) = jobs.iter().find(|job| {
        matches!(
            job.status,
            JobStatus::Failed | JobStatus::Timeout | JobStatus::Canceled
        )
    }) {
        return Some(PhaseDecision::Fail {
            job_id: job.job_id.clone(),
            reason: failure_reason(job),
        });
    }

    if jobs.iter().all(|job| job.status == JobStatus::Completed) {
        return Some(PhaseDecision::Done);
    }

    let in_play = |role: &str| {
        jobs.iter().any(|job| has_role(job, role) && job.status.is_outstanding())
    };
    let phase = if in_play(roles::RELEASE) {
        TaskStatus::Releasing
    } else if in_play(roles::REVIEWER) {
        TaskStatus::Reviewing
    } else {
        TaskStatus::Running
    };
    Some(PhaseDecision::Active(phase))
}
