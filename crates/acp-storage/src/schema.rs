//! Table definitions
//!
//! Plan, payload and result fields are JSON text. The circuit breaker and
//! emergency stop are single rows seeded when the schema is created.

pub(crate) const GLOBAL_SCOPE: &str = "global";
pub(crate) const EMERGENCY_STOP_KEY: &str = "emergency_stop";

pub(crate) const STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS tasks (
        task_id TEXT PRIMARY KEY,
        goal TEXT NOT NULL,
        repo TEXT NOT NULL,
        branch TEXT NOT NULL,
        acceptance_criteria TEXT NOT NULL,
        priority TEXT NOT NULL,
        risk_profile TEXT NOT NULL,
        status TEXT NOT NULL,
        parallelism_limit INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        degraded INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        failed_reason TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS task_plans (
        task_id TEXT PRIMARY KEY,
        plan TEXT NOT NULL,
        reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS jobs (
        job_id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        role TEXT NOT NULL,
        payload TEXT NOT NULL,
        timeout_s INTEGER NOT NULL,
        max_retries INTEGER NOT NULL,
        attempt INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        worker_id TEXT,
        depends_on TEXT NOT NULL,
        next_run_at TEXT,
        last_error TEXT,
        artifacts TEXT NOT NULL,
        logs TEXT NOT NULL,
        metrics TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS task_events (
        id INTEGER PRIMARY KEY,
        task_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        ts TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS decision_records (
        id INTEGER PRIMARY KEY,
        task_id TEXT,
        decision_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rollback_records (
        id INTEGER PRIMARY KEY,
        task_id TEXT NOT NULL,
        trigger_kind TEXT NOT NULL,
        reason TEXT NOT NULL,
        canceled_jobs INTEGER NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS system_controls (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS circuit_breakers (
        scope TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        failure_count INTEGER NOT NULL,
        threshold INTEGER NOT NULL,
        opened_at TEXT,
        reason TEXT,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_task ON jobs(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_ready ON jobs(status, next_run_at)",
    "CREATE INDEX IF NOT EXISTS idx_events_task ON task_events(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_decisions_task ON decision_records(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_rollbacks_task ON rollback_records(task_id)",
];
