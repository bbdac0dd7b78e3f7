//! Operator control actions and global system state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{CircuitBreakerState, EmergencyStop};
use crate::status::TaskStatus;

/// Control action applied to a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskControlAction {
    Pause,
    Resume,
    Cancel,
    EmergencyStop,
    ForceRollback,
}

impl TaskControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::EmergencyStop => "emergency_stop",
            Self::ForceRollback => "force_rollback",
        }
    }
}

impl std::fmt::Display for TaskControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "cancel" => Ok(Self::Cancel),
            "emergency_stop" => Ok(Self::EmergencyStop),
            "force_rollback" => Ok(Self::ForceRollback),
            _ => Err(format!("Invalid task control action: {}", s)),
        }
    }
}

/// Control action applied to the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalControlAction {
    EmergencyStop,
    EmergencyStopClear,
    CircuitReset,
}

impl GlobalControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmergencyStop => "emergency_stop",
            Self::EmergencyStopClear => "emergency_stop_clear",
            Self::CircuitReset => "circuit_reset",
        }
    }
}

impl std::fmt::Display for GlobalControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GlobalControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "emergency_stop" => Ok(Self::EmergencyStop),
            "emergency_stop_clear" => Ok(Self::EmergencyStopClear),
            "circuit_reset" => Ok(Self::CircuitReset),
            _ => Err(format!("Invalid global control action: {}", s)),
        }
    }
}

/// Who asked for a control action and why
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ControlRequest {
    pub fn new(requested_by: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            requested_by: Some(requested_by.into()),
            reason: Some(reason.into()),
        }
    }

    pub fn actor(&self) -> &str {
        self.requested_by.as_deref().unwrap_or("operator")
    }
}

/// The global switches, as shown alongside a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemControls {
    pub emergency_stop: EmergencyStop,
    pub circuit_breaker: CircuitBreakerState,
}

/// Inputs to the admission controller, captured once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub emergency_stop: EmergencyStop,
    pub circuit_breaker: CircuitBreakerState,
    /// Jobs holding a worker slot across all tasks
    pub active_jobs: u32,
    /// Queued jobs across dispatchable tasks (filled in by the tick)
    #[serde(default)]
    pub queue_depth: u32,
}

impl SystemSnapshot {
    pub fn with_queue_depth(mut self, queue_depth: u32) -> Self {
        self.queue_depth = queue_depth;
        self
    }
}

/// Task counts per status, for health reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusCounts {
    pub total: u32,
    pub by_status: BTreeMap<String, u32>,
}

impl TaskStatusCounts {
    pub fn record(&mut self, status: TaskStatus, count: u32) {
        self.total += count;
        *self.by_status.entry(status.as_str().to_string()).or_insert(0) += count;
    }

    pub fn get(&self, status: TaskStatus) -> u32 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_actions_parse() {
        assert_eq!(
            "force_rollback".parse::<TaskControlAction>().unwrap(),
            TaskControlAction::ForceRollback
        );
        assert_eq!(
            "Circuit_Reset".parse::<GlobalControlAction>().unwrap(),
            GlobalControlAction::CircuitReset
        );
        assert!("reboot".parse::<TaskControlAction>().is_err());
        assert!("pause".parse::<GlobalControlAction>().is_err());
    }

    #[test]
    fn test_status_counts() {
        let mut counts = TaskStatusCounts::default();
        counts.record(TaskStatus::Running, 2);
        counts.record(TaskStatus::Done, 1);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.get(TaskStatus::Running), 2);
        assert_eq!(counts.get(TaskStatus::Failed), 0);
    }
}
