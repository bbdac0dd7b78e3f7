//! State store handle, schema bootstrap and global-state readers.
//!
//! Architecture:
//!   - One turso connection behind an async mutex: every operation holds the
//!     lock for its whole transaction, so check-then-write sequences are
//!     atomic and concurrent callers are serialized.
//!   - Status changes are additionally guarded by `WHERE status = <expected>`
//!     so a caller that loses a race sees zero changed rows and skips.

use acp_core::time::format_ts;
use acp_core::{
    CircuitBreakerState, ControlPlaneConfig, EmergencyStop, SystemControls, SystemSnapshot,
};
use chrono::Utc;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};
use turso::{params, Builder, Connection};

use crate::error::Result;
use crate::rows::{count_active_jobs, fetch_circuit, fetch_emergency_stop, store_emergency_stop};
use crate::schema::{EMERGENCY_STOP_KEY, GLOBAL_SCOPE, STATEMENTS};

/// Limits the store enforces on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Jobs allowed to hold a worker slot at once, across all tasks
    pub global_parallelism: u32,
    /// Critical failures before the circuit breaker opens
    pub circuit_threshold: u32,
    /// Per-task parallelism when a task does not give one
    pub default_task_parallelism: u32,
    /// Largest batch one worker claim may take
    pub claim_limit_max: u32,
    /// Default page size for task listings
    pub list_limit_default: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&ControlPlaneConfig::default())
    }
}

impl From<&ControlPlaneConfig> for StoreOptions {
    fn from(config: &ControlPlaneConfig) -> Self {
        Self {
            global_parallelism: config.global_parallelism.clamp(1, 200),
            circuit_threshold: config.circuit_threshold.max(1),
            default_task_parallelism: config.default_task_parallelism.clamp(1, 10),
            claim_limit_max: config.claim_limit_max.max(1),
            list_limit_default: config.list_limit_default.clamp(1, 200),
        }
    }
}

/// The control plane's system of record
pub struct StateStore {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) options: StoreOptions,
    path: String,
}

impl StateStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        // PRAGMA statements may return rows, so use query()
        let _ = conn.query("PRAGMA journal_mode=WAL", params![]).await?;
        let _ = conn.query("PRAGMA busy_timeout=5000", params![]).await?;

        let store = Self {
            conn: Mutex::new(conn),
            options,
            path: path_str,
        };
        store.init_schema().await?;
        info!("State store ready at {}", store.path);
        Ok(store)
    }

    /// Returns the database file path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Create tables and seed the global rows. Idempotent.
    ///
    /// The configured circuit threshold is written on every call so a
    /// config change takes effect on restart without touching the count.
    pub async fn init_schema(&self) -> Result<()> {
        let threshold = i64::from(self.options.circuit_threshold);
        transactional!(self, |conn| {
            for stmt in STATEMENTS {
                conn.execute(stmt, params![]).await?;
            }

            let now = format_ts(Utc::now());
            conn.execute(
                "INSERT INTO circuit_breakers \
                 (scope, status, failure_count, threshold, opened_at, reason, updated_at) \
                 VALUES (?, 'closed', 0, ?, NULL, NULL, ?) ON CONFLICT(scope) DO NOTHING",
                params![GLOBAL_SCOPE, threshold, now.clone()],
            )
            .await?;
            conn.execute(
                "UPDATE circuit_breakers SET threshold = ? WHERE scope = ?",
                params![threshold, GLOBAL_SCOPE],
            )
            .await?;

            conn.execute(
                "INSERT INTO system_controls (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO NOTHING",
                params![
                    EMERGENCY_STOP_KEY,
                    serde_json::to_string(&EmergencyStop::default())?,
                    now
                ],
            )
            .await?;
            debug!("Schema ensured ({} statements)", STATEMENTS.len());
            Ok(())
        })
    }

    /// Current circuit breaker row
    pub async fn circuit_breaker(&self) -> Result<CircuitBreakerState> {
        read_only!(self, |conn| { fetch_circuit(conn).await })
    }

    /// Current emergency stop flag
    pub async fn emergency_stop(&self) -> Result<EmergencyStop> {
        read_only!(self, |conn| { fetch_emergency_stop(conn).await })
    }

    /// Set or clear the emergency stop outside of any task context
    pub(crate) async fn write_emergency_stop(
        conn: &Connection,
        active: bool,
        by: Option<&str>,
        reason: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) -> Result<EmergencyStop> {
        let stop = EmergencyStop {
            active,
            by: by.map(str::to_string),
            reason: reason.map(str::to_string),
            at: Some(now),
        };
        store_emergency_stop(conn, &stop, now).await?;
        Ok(stop)
    }

    /// Both global switches together
    pub async fn system_controls(&self) -> Result<SystemControls> {
        read_only!(self, |conn| {
            Ok(SystemControls {
                emergency_stop: fetch_emergency_stop(conn).await?,
                circuit_breaker: fetch_circuit(conn).await?,
            })
        })
    }

    /// Emergency stop, circuit breaker and global active job count.
    ///
    /// `queue_depth` is left at zero; the tick fills it in.
    pub async fn system_snapshot(&self) -> Result<SystemSnapshot> {
        read_only!(self, |conn| {
            Ok(SystemSnapshot {
                emergency_stop: fetch_emergency_stop(conn).await?,
                circuit_breaker: fetch_circuit(conn).await?,
                active_jobs: count_active_jobs(conn, None).await?,
                queue_depth: 0,
            })
        })
    }
}
