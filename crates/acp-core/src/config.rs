//! Configuration management for the control plane
//!
//! Settings are read from a TOML file (by convention `.acp/config.toml`).
//! Every key is optional; missing keys fall back to the documented defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{AcpError, Result};

/// Control plane runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Database file backing the state store
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Milliseconds between orchestration ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Tasks planned per tick
    #[serde(default = "default_planning_batch")]
    pub planning_batch: u32,

    /// Upper bound on jobs dispatched per tick (1-20)
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: u32,

    /// Jobs allowed to hold a worker slot at once, across all tasks
    #[serde(default = "default_global_parallelism")]
    pub global_parallelism: u32,

    /// Per-task parallelism when a task does not specify one (1-10)
    #[serde(default = "default_task_parallelism")]
    pub default_task_parallelism: u32,

    /// Critical failures before the circuit breaker opens
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,

    /// Largest batch a worker may claim in one call
    #[serde(default = "default_claim_limit_max")]
    pub claim_limit_max: u32,

    /// Page size for task listings when the caller gives none
    #[serde(default = "default_list_limit")]
    pub list_limit_default: u32,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(".acp/control-plane.db")
}

fn default_tick_interval_ms() -> u64 {
    1500
}

fn default_planning_batch() -> u32 {
    10
}

fn default_max_parallelism() -> u32 {
    10
}

fn default_global_parallelism() -> u32 {
    10
}

fn default_task_parallelism() -> u32 {
    8
}

fn default_circuit_threshold() -> u32 {
    3
}

fn default_claim_limit_max() -> u32 {
    20
}

fn default_list_limit() -> u32 {
    40
}

impl ControlPlaneConfig {
    /// Load configuration from `path`, or defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AcpError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration to `path`, creating parent directories
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| AcpError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(AcpError::Config("tick_interval_ms must be positive".into()));
        }
        if self.circuit_threshold == 0 {
            return Err(AcpError::Config("circuit_threshold must be at least 1".into()));
        }
        if self.planning_batch == 0 {
            return Err(AcpError::Config("planning_batch must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            tick_interval_ms: default_tick_interval_ms(),
            planning_batch: default_planning_batch(),
            max_parallelism: default_max_parallelism(),
            global_parallelism: default_global_parallelism(),
            default_task_parallelism: default_task_parallelism(),
            circuit_threshold: default_circuit_threshold(),
            claim_limit_max: default_claim_limit_max(),
            list_limit_default: default_list_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ControlPlaneConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, ControlPlaneConfig::default());
        assert_eq!(config.circuit_threshold, 3);
        assert_eq!(config.default_task_parallelism, 8);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_parallelism = 4\ncircuit_threshold = 5\n").unwrap();

        let config = ControlPlaneConfig::load_or_default(&path).unwrap();
        assert_eq!(config.max_parallelism, 4);
        assert_eq!(config.circuit_threshold, 5);
        assert_eq!(config.tick_interval_ms, 1500);
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".acp/config.toml");
        ControlPlaneConfig::write_default(&path).unwrap();
        let config = ControlPlaneConfig::load_or_default(&path).unwrap();
        assert_eq!(config, ControlPlaneConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "circuit_threshold = 0\n").unwrap();
        assert!(ControlPlaneConfig::load_or_default(&path).is_err());

        std::fs::write(&path, "tick_interval_ms = \"fast\"\n").unwrap();
        assert!(matches!(
            ControlPlaneConfig::load_or_default(&path),
            Err(AcpError::Config(_))
        ));
    }
}
