//! Store error taxonomy

/// Errors returned by [`crate::StateStore`] operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] acp_core::AcpError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {job_id} is owned by worker {owner}, not {worker_id}")]
    JobOwnedByOtherWorker {
        job_id: String,
        owner: String,
        worker_id: String,
    },

    #[error("invalid control action: {0}")]
    InvalidControl(String),

    #[error("cannot {action} task {task_id} while it is {status}")]
    InvalidTransition {
        task_id: String,
        action: String,
        status: String,
    },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Stable code reported to API callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::TaskNotFound(_) => "task_not_found",
            Self::JobNotFound(_) => "job_not_found",
            Self::JobOwnedByOtherWorker { .. } => "job_owned_by_other_worker",
            Self::InvalidControl(_) => "invalid_control_action",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Turso(_) | Self::Json(_) | Self::Io(_) | Self::Core(_) | Self::Corrupt(_) => {
                "internal_error"
            }
        }
    }

    /// True when the caller, not the system, is at fault
    pub fn is_client_error(&self) -> bool {
        self.code() != "internal_error"
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
