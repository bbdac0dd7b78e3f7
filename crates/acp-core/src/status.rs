//! Lifecycle enums for tasks and jobs

use serde::{Deserialize, Serialize};

/// Task priority levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    #[default]
    P1,
    P2,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        }
    }

    /// Lenient parse used at task creation: anything unrecognized is P1.
    pub fn normalize(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "p0" | "0" => Ok(Self::P0),
            "p1" | "1" => Ok(Self::P1),
            "p2" | "2" => Ok(Self::P2),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Risk profile declared by the task author
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn normalize(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }
}

impl std::fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid risk profile: {}", s)),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Planning,
    Running,
    Reviewing,
    Releasing,
    Paused,
    Done,
    Failed,
    RolledBack,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 10] = [
        Self::Queued,
        Self::Planning,
        Self::Running,
        Self::Reviewing,
        Self::Releasing,
        Self::Paused,
        Self::Done,
        Self::Failed,
        Self::RolledBack,
        Self::Canceled,
    ];

    /// Statuses whose queued jobs may be dispatched
    pub const DISPATCHABLE: [TaskStatus; 3] = [Self::Running, Self::Reviewing, Self::Releasing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Reviewing => "reviewing",
            Self::Releasing => "releasing",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::RolledBack | Self::Canceled
        )
    }

    /// Terminal or paused tasks are frozen: job mutations no longer move them.
    pub fn is_frozen(&self) -> bool {
        self.is_terminal() || *self == Self::Paused
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid task status: {}", s))
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Blocked,
    #[default]
    Queued,
    Dispatched,
    Claimed,
    Running,
    Completed,
    Failed,
    Timeout,
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        Self::Blocked,
        Self::Queued,
        Self::Dispatched,
        Self::Claimed,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Timeout,
        Self::Canceled,
    ];

    /// Non-terminal statuses, in the order rollback cancels them
    pub const OUTSTANDING: [JobStatus; 5] = [
        Self::Blocked,
        Self::Queued,
        Self::Dispatched,
        Self::Claimed,
        Self::Running,
    ];

    /// Statuses that hold a worker slot
    pub const SLOT_HOLDING: [JobStatus; 3] = [Self::Dispatched, Self::Claimed, Self::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Canceled
        )
    }

    pub fn is_outstanding(&self) -> bool {
        !self.is_terminal()
    }

    pub fn holds_slot(&self) -> bool {
        Self::SLOT_HOLDING.contains(self)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid job status: {}", s))
    }
}

/// Outcome a worker reports for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
    Timeout,
    Canceled,
}

impl ResultStatus {
    /// Map a worker-supplied status string onto a known outcome.
    ///
    /// Anything unrecognized is treated as a failure.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "completed" | "complete" | "success" | "succeeded" | "done" => Self::Completed,
            "timeout" | "timed_out" => Self::Timeout,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Failed,
        }
    }

    pub fn job_status(&self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            Self::Failed => JobStatus::Failed,
            Self::Timeout => JobStatus::Timeout,
            Self::Canceled => JobStatus::Canceled,
        }
    }

    /// Failed and timed-out jobs may be retried; cancellation is final.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }
}

/// Circuit breaker position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitStatus {
    #[default]
    Closed,
    Open,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CircuitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            _ => Err(format!("Invalid circuit status: {}", s)),
        }
    }
}
