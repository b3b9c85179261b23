//! Workflow persistence.
//!
//! [`WorkflowStorage`] is the seam the engine depends on; [`WorkflowStore`]
//! implements it over SQLite. Every state transition is one conditional
//! write: `UPDATE ... WHERE id = ? AND status = ? AND lock_version = ?`.
//! A write that touches zero rows means the caller lost a race, and methods
//! report that as `Ok(false)` / `Ok(None)` rather than an error.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use kmp_config::DatabaseSection;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::graph::WorkflowGraph;
use crate::model::{
    ApprovalStatus, ApprovalVote, ExecutionLog, InstanceStatus, LogStatus, VersionStatus,
    VoteDecision, WorkflowApproval, WorkflowDefinition, WorkflowInstance, WorkflowVersion,
};

/// Current schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

/// Storage operations the engine, aggregator, sweep and definition service
/// rely on.
pub trait WorkflowStorage: Send + Sync {
    // ── Definitions ─────────────────────────────────────────────────────

    /// Insert a definition. Fails with `DuplicateSlug` if the slug is taken.
    fn insert_definition(&self, definition: &WorkflowDefinition) -> Result<()>;

    fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>>;

    fn find_definition_by_slug(&self, slug: &str) -> Result<Option<WorkflowDefinition>>;

    fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>>;

    /// Toggle the soft-disable flag. Returns false if no such definition.
    fn set_definition_active(&self, id: &str, active: bool) -> Result<bool>;

    // ── Versions ────────────────────────────────────────────────────────

    /// Create a draft version numbered one past the definition's highest.
    fn create_version(&self, definition_id: &str, graph: &WorkflowGraph) -> Result<WorkflowVersion>;

    fn get_version(&self, id: &str) -> Result<Option<WorkflowVersion>>;

    fn published_version(&self, definition_id: &str) -> Result<Option<WorkflowVersion>>;

    fn list_versions(&self, definition_id: &str) -> Result<Vec<WorkflowVersion>>;

    /// Publish a version, archiving whichever version was published before.
    fn publish_version(&self, version_id: &str) -> Result<WorkflowVersion>;

    fn archive_version(&self, version_id: &str) -> Result<bool>;

    // ── Instances ───────────────────────────────────────────────────────

    fn insert_instance(&self, instance: &WorkflowInstance) -> Result<()>;

    fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>>;

    /// Instances, newest first, optionally filtered by status.
    fn list_instances(&self, status: Option<InstanceStatus>) -> Result<Vec<WorkflowInstance>>;

    /// Persist the instance if the stored row still has `expected_status`
    /// and the instance's `lock_version`. On success the in-memory
    /// `lock_version` is bumped to match the row.
    fn save_instance(
        &self,
        instance: &mut WorkflowInstance,
        expected_status: InstanceStatus,
    ) -> Result<bool>;

    // ── Execution logs ──────────────────────────────────────────────────

    fn insert_log(&self, log: &ExecutionLog) -> Result<()>;

    /// The open `waiting` row for a node of an instance, if any.
    fn waiting_log(&self, instance_id: &str, node_id: &str) -> Result<Option<ExecutionLog>>;

    /// Mark a `waiting` row `done`. Returns false if it was already closed.
    fn finish_waiting_log(&self, log_id: &str, output: &Value) -> Result<bool>;

    /// Log rows of an instance in insertion order.
    fn list_logs(&self, instance_id: &str) -> Result<Vec<ExecutionLog>>;

    /// Waiting timer rows whose `resume_at` is at or before `now`.
    fn due_waits(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ExecutionLog>>;

    // ── Approvals ───────────────────────────────────────────────────────

    /// Insert an approval together with its `waiting` log row.
    fn open_approval(&self, log: &ExecutionLog, approval: &WorkflowApproval) -> Result<()>;

    fn get_approval(&self, id: &str) -> Result<Option<WorkflowApproval>>;

    /// The pending approval for a node visit, if one exists.
    fn pending_approval(&self, instance_id: &str, node_id: &str) -> Result<Option<WorkflowApproval>>;

    fn list_approvals(&self, instance_id: &str) -> Result<Vec<WorkflowApproval>>;

    fn pending_approvals(&self) -> Result<Vec<WorkflowApproval>>;

    /// Pending approvals whose deadline is before `now`.
    fn expired_approvals(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WorkflowApproval>>;

    /// Count a vote and store it, atomically.
    ///
    /// Returns the updated approval, or `None` if it was no longer pending.
    /// Fails with `DuplicateVote` if the voter already voted.
    fn record_vote(&self, vote: &ApprovalVote) -> Result<Option<WorkflowApproval>>;

    /// Move a pending approval to a resolved status. False if not pending.
    fn resolve_approval(&self, id: &str, status: ApprovalStatus) -> Result<bool>;

    /// Cancel pending approvals of an instance (optionally only one node's).
    fn cancel_pending_approvals(&self, instance_id: &str, node_id: Option<&str>) -> Result<usize>;

    fn list_votes(&self, approval_id: &str) -> Result<Vec<ApprovalVote>>;
}

/// SQLite-backed [`WorkflowStorage`].
///
/// Thread-safe via an internal `Mutex<Connection>`.
pub struct WorkflowStore {
    conn: Mutex<Connection>,
}

impl WorkflowStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Duration::from_millis(5000))
    }

    /// Open the database described by a config section.
    pub fn open_with(section: &DatabaseSection) -> Result<Self> {
        let path = section.resolved_path();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::open_with_timeout(&path, Duration::from_millis(section.busy_timeout_ms))
    }

    fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&conn)?;
        debug!(path = %path.display(), "opened workflow store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        debug!("Workflow schema up to date (version {})", current_version);
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_definitions (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            trigger_type TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workflow_versions (
            id TEXT PRIMARY KEY,
            definition_id TEXT NOT NULL REFERENCES workflow_definitions(id),
            version_number INTEGER NOT NULL,
            graph TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            published_at TEXT,
            UNIQUE (definition_id, version_number)
        );

        -- At most one published version per definition
        CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_one_published
            ON workflow_versions(definition_id) WHERE status = 'published';

        CREATE TABLE IF NOT EXISTS workflow_instances (
            id TEXT PRIMARY KEY,
            definition_id TEXT NOT NULL REFERENCES workflow_definitions(id),
            version_id TEXT NOT NULL REFERENCES workflow_versions(id),
            status TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '{}',
            trigger_payload TEXT NOT NULL DEFAULT 'null',
            current_nodes TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            lock_version INTEGER NOT NULL DEFAULT 0,
            restarted_from TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_instances_status
            ON workflow_instances(status);

        CREATE TABLE IF NOT EXISTS workflow_execution_logs (
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL REFERENCES workflow_instances(id) ON DELETE CASCADE,
            node_id TEXT NOT NULL,
            node_type TEXT NOT NULL,
            status TEXT NOT NULL,
            output TEXT NOT NULL DEFAULT 'null',
            error TEXT,
            resume_at TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_logs_instance_node
            ON workflow_execution_logs(instance_id, node_id, status);

        CREATE INDEX IF NOT EXISTS idx_logs_due
            ON workflow_execution_logs(status, resume_at);

        CREATE TABLE IF NOT EXISTS workflow_approvals (
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL REFERENCES workflow_instances(id) ON DELETE CASCADE,
            node_id TEXT NOT NULL,
            execution_log_id TEXT NOT NULL REFERENCES workflow_execution_logs(id) ON DELETE CASCADE,
            approver_type TEXT NOT NULL,
            approver_config TEXT NOT NULL DEFAULT '{}',
            required_count INTEGER NOT NULL,
            approved_count INTEGER NOT NULL DEFAULT 0,
            rejected_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            allow_parallel INTEGER NOT NULL DEFAULT 1,
            deadline TEXT,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_approvals_deadline
            ON workflow_approvals(status, deadline);

        -- One open gate per node visit
        CREATE UNIQUE INDEX IF NOT EXISTS idx_approvals_one_pending
            ON workflow_approvals(instance_id, node_id) WHERE status = 'pending';

        CREATE TABLE IF NOT EXISTS workflow_approval_votes (
            id TEXT PRIMARY KEY,
            approval_id TEXT NOT NULL REFERENCES workflow_approvals(id) ON DELETE CASCADE,
            voter_id TEXT NOT NULL,
            decision TEXT NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (approval_id, voter_id)
        );
        "#,
    )
    .map_err(|e| WorkflowError::Migration(e.to_string()))?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    info!("Workflow schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Column lists
// ─────────────────────────────────────────────────────────────────────────────

const DEFINITION_COLUMNS: &str =
    "id, slug, name, description, trigger_type, is_active, created_at, updated_at";

const VERSION_COLUMNS: &str =
    "id, definition_id, version_number, graph, status, created_at, published_at";

const INSTANCE_COLUMNS: &str = "id, definition_id, version_id, status, context, trigger_payload, \
     current_nodes, error, lock_version, restarted_from, created_at, updated_at, completed_at";

const LOG_COLUMNS: &str =
    "id, instance_id, node_id, node_type, status, output, error, resume_at, started_at, finished_at";

const APPROVAL_COLUMNS: &str = "id, instance_id, node_id, execution_log_id, approver_type, \
     approver_config, required_count, approved_count, rejected_count, status, allow_parallel, \
     deadline, created_at, resolved_at";

const VOTE_COLUMNS: &str = "id, approval_id, voter_id, decision, notes, created_at";

impl WorkflowStorage for WorkflowStore {
    // ── Definitions ─────────────────────────────────────────────────────

    fn insert_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        let result = self.conn.lock().execute(
            "INSERT INTO workflow_definitions
                 (id, slug, name, description, trigger_type, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                definition.id,
                definition.slug,
                definition.name,
                definition.description,
                definition.trigger_type,
                definition.is_active,
                fmt_dt(&definition.created_at),
                fmt_dt(&definition.updated_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(WorkflowError::DuplicateSlug(definition.slug.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let sql = format!("SELECT {DEFINITION_COLUMNS} FROM workflow_definitions WHERE id = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![id], row_to_definition)
            .optional()?)
    }

    fn find_definition_by_slug(&self, slug: &str) -> Result<Option<WorkflowDefinition>> {
        let sql = format!("SELECT {DEFINITION_COLUMNS} FROM workflow_definitions WHERE slug = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![slug], row_to_definition)
            .optional()?)
    }

    fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {DEFINITION_COLUMNS} FROM workflow_definitions ORDER BY slug");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_definition)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn set_definition_active(&self, id: &str, active: bool) -> Result<bool> {
        let updated = self.conn.lock().execute(
            "UPDATE workflow_definitions SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, now_str(), id],
        )?;
        Ok(updated > 0)
    }

    // ── Versions ────────────────────────────────────────────────────────

    fn create_version(&self, definition_id: &str, graph: &WorkflowGraph) -> Result<WorkflowVersion> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM workflow_definitions WHERE id = ?1",
                params![definition_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(WorkflowError::DefinitionNotFound(definition_id.to_string()));
        }

        let version_number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM workflow_versions
             WHERE definition_id = ?1",
            params![definition_id],
            |row| row.get(0),
        )?;

        let version = WorkflowVersion {
            id: Uuid::new_v4().to_string(),
            definition_id: definition_id.to_string(),
            version_number,
            graph: graph.clone(),
            status: VersionStatus::Draft,
            created_at: Utc::now(),
            published_at: None,
        };

        tx.execute(
            "INSERT INTO workflow_versions
                 (id, definition_id, version_number, graph, status, created_at, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![
                version.id,
                version.definition_id,
                version.version_number,
                serde_json::to_string(&version.graph)?,
                version.status.as_str(),
                fmt_dt(&version.created_at),
            ],
        )?;
        tx.commit()?;

        Ok(version)
    }

    fn get_version(&self, id: &str) -> Result<Option<WorkflowVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM workflow_versions WHERE id = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![id], row_to_version)
            .optional()?)
    }

    fn published_version(&self, definition_id: &str) -> Result<Option<WorkflowVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions
             WHERE definition_id = ?1 AND status = 'published'"
        );
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![definition_id], row_to_version)
            .optional()?)
    }

    fn list_versions(&self, definition_id: &str) -> Result<Vec<WorkflowVersion>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions
             WHERE definition_id = ?1 ORDER BY version_number"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![definition_id], row_to_version)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn publish_version(&self, version_id: &str) -> Result<WorkflowVersion> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let sql = format!("SELECT {VERSION_COLUMNS} FROM workflow_versions WHERE id = ?1");
        let mut version = tx
            .query_row(&sql, params![version_id], row_to_version)
            .optional()?
            .ok_or_else(|| WorkflowError::VersionNotFound(version_id.to_string()))?;

        if version.status == VersionStatus::Published {
            return Ok(version);
        }

        tx.execute(
            "UPDATE workflow_versions SET status = 'archived'
             WHERE definition_id = ?1 AND status = 'published'",
            params![version.definition_id],
        )?;

        let published_at = Utc::now();
        tx.execute(
            "UPDATE workflow_versions SET status = 'published', published_at = ?1 WHERE id = ?2",
            params![fmt_dt(&published_at), version_id],
        )?;
        tx.commit()?;

        version.status = VersionStatus::Published;
        version.published_at = Some(published_at);
        Ok(version)
    }

    fn archive_version(&self, version_id: &str) -> Result<bool> {
        let updated = self.conn.lock().execute(
            "UPDATE workflow_versions SET status = 'archived' WHERE id = ?1",
            params![version_id],
        )?;
        Ok(updated > 0)
    }

    // ── Instances ───────────────────────────────────────────────────────

    fn insert_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO workflow_instances
                 (id, definition_id, version_id, status, context, trigger_payload, current_nodes,
                  error, lock_version, restarted_from, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                instance.id,
                instance.definition_id,
                instance.version_id,
                instance.status.as_str(),
                serde_json::to_string(&instance.context)?,
                serde_json::to_string(&instance.trigger_payload)?,
                serde_json::to_string(&instance.current_nodes)?,
                instance.error,
                instance.lock_version,
                instance.restarted_from,
                fmt_dt(&instance.created_at),
                fmt_dt(&instance.updated_at),
                instance.completed_at.as_ref().map(fmt_dt),
            ],
        )?;
        Ok(())
    }

    fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![id], row_to_instance)
            .optional()?)
    }

    fn list_instances(&self, status: Option<InstanceStatus>) -> Result<Vec<WorkflowInstance>> {
        let conn = self.conn.lock();
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {INSTANCE_COLUMNS} FROM workflow_instances
                     WHERE status = ?1 ORDER BY created_at DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let iter = stmt.query_map(params![status.as_str()], row_to_instance)?;
                iter.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {INSTANCE_COLUMNS} FROM workflow_instances ORDER BY created_at DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let iter = stmt.query_map([], row_to_instance)?;
                iter.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    fn save_instance(
        &self,
        instance: &mut WorkflowInstance,
        expected_status: InstanceStatus,
    ) -> Result<bool> {
        let now = Utc::now();
        let updated = self.conn.lock().execute(
            "UPDATE workflow_instances
             SET status = ?1, context = ?2, current_nodes = ?3, error = ?4,
                 lock_version = lock_version + 1, updated_at = ?5, completed_at = ?6
             WHERE id = ?7 AND status = ?8 AND lock_version = ?9",
            params![
                instance.status.as_str(),
                serde_json::to_string(&instance.context)?,
                serde_json::to_string(&instance.current_nodes)?,
                instance.error,
                fmt_dt(&now),
                instance.completed_at.as_ref().map(fmt_dt),
                instance.id,
                expected_status.as_str(),
                instance.lock_version,
            ],
        )?;

        if updated == 0 {
            debug!(
                instance_id = %instance.id,
                expected = %expected_status,
                lock_version = instance.lock_version,
                "conditional instance write lost"
            );
            return Ok(false);
        }

        instance.lock_version += 1;
        instance.updated_at = now;
        Ok(true)
    }

    // ── Execution logs ──────────────────────────────────────────────────

    fn insert_log(&self, log: &ExecutionLog) -> Result<()> {
        insert_log_row(&self.conn.lock(), log)
    }

    fn waiting_log(&self, instance_id: &str, node_id: &str) -> Result<Option<ExecutionLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM workflow_execution_logs
             WHERE instance_id = ?1 AND node_id = ?2 AND status = 'waiting'
             ORDER BY rowid DESC LIMIT 1"
        );
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![instance_id, node_id], row_to_log)
            .optional()?)
    }

    fn finish_waiting_log(&self, log_id: &str, output: &Value) -> Result<bool> {
        let updated = self.conn.lock().execute(
            "UPDATE workflow_execution_logs SET status = 'done', output = ?1, finished_at = ?2
             WHERE id = ?3 AND status = 'waiting'",
            params![serde_json::to_string(output)?, now_str(), log_id],
        )?;
        Ok(updated > 0)
    }

    fn list_logs(&self, instance_id: &str) -> Result<Vec<ExecutionLog>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM workflow_execution_logs
             WHERE instance_id = ?1 ORDER BY rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![instance_id], row_to_log)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn due_waits(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ExecutionLog>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM workflow_execution_logs
             WHERE status = 'waiting' AND node_type = 'wait'
               AND resume_at IS NOT NULL AND resume_at <= ?1
             ORDER BY resume_at LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![fmt_dt(&now), limit as i64], row_to_log)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Approvals ───────────────────────────────────────────────────────

    fn open_approval(&self, log: &ExecutionLog, approval: &WorkflowApproval) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_log_row(&tx, log)?;
        tx.execute(
            "INSERT INTO workflow_approvals
                 (id, instance_id, node_id, execution_log_id, approver_type, approver_config,
                  required_count, approved_count, rejected_count, status, allow_parallel,
                  deadline, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                approval.id,
                approval.instance_id,
                approval.node_id,
                approval.execution_log_id,
                approval.approver_type,
                serde_json::to_string(&approval.approver_config)?,
                approval.required_count,
                approval.approved_count,
                approval.rejected_count,
                approval.status.as_str(),
                approval.allow_parallel,
                approval.deadline.as_ref().map(fmt_dt),
                fmt_dt(&approval.created_at),
                approval.resolved_at.as_ref().map(fmt_dt),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_approval(&self, id: &str) -> Result<Option<WorkflowApproval>> {
        let sql = format!("SELECT {APPROVAL_COLUMNS} FROM workflow_approvals WHERE id = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![id], row_to_approval)
            .optional()?)
    }

    fn pending_approval(&self, instance_id: &str, node_id: &str) -> Result<Option<WorkflowApproval>> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM workflow_approvals
             WHERE instance_id = ?1 AND node_id = ?2 AND status = 'pending'"
        );
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![instance_id, node_id], row_to_approval)
            .optional()?)
    }

    fn list_approvals(&self, instance_id: &str) -> Result<Vec<WorkflowApproval>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM workflow_approvals
             WHERE instance_id = ?1 ORDER BY rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![instance_id], row_to_approval)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn pending_approvals(&self) -> Result<Vec<WorkflowApproval>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM workflow_approvals
             WHERE status = 'pending' ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_approval)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn expired_approvals(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WorkflowApproval>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM workflow_approvals
             WHERE status = 'pending' AND deadline IS NOT NULL AND deadline < ?1
             ORDER BY deadline LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![fmt_dt(&now), limit as i64], row_to_approval)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_vote(&self, vote: &ApprovalVote) -> Result<Option<WorkflowApproval>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let (approve, reject) = match vote.decision {
            VoteDecision::Approve => (1, 0),
            VoteDecision::Reject => (0, 1),
        };
        let updated = tx.execute(
            "UPDATE workflow_approvals
             SET approved_count = approved_count + ?1, rejected_count = rejected_count + ?2
             WHERE id = ?3 AND status = 'pending'",
            params![approve, reject, vote.approval_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }

        let inserted = tx.execute(
            "INSERT INTO workflow_approval_votes (id, approval_id, voter_id, decision, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                vote.id,
                vote.approval_id,
                vote.voter_id,
                vote.decision.as_str(),
                vote.notes,
                fmt_dt(&vote.created_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            // Dropping the transaction rolls back the counter update.
            Err(e) if is_unique_violation(&e) => {
                return Err(WorkflowError::DuplicateVote {
                    approval_id: vote.approval_id.clone(),
                    voter_id: vote.voter_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let sql = format!("SELECT {APPROVAL_COLUMNS} FROM workflow_approvals WHERE id = ?1");
        let approval = tx.query_row(&sql, params![vote.approval_id], row_to_approval)?;
        tx.commit()?;
        Ok(Some(approval))
    }

    fn resolve_approval(&self, id: &str, status: ApprovalStatus) -> Result<bool> {
        let updated = self.conn.lock().execute(
            "UPDATE workflow_approvals SET status = ?1, resolved_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![status.as_str(), now_str(), id],
        )?;
        Ok(updated > 0)
    }

    fn cancel_pending_approvals(&self, instance_id: &str, node_id: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock();
        let updated = match node_id {
            Some(node_id) => conn.execute(
                "UPDATE workflow_approvals SET status = 'cancelled', resolved_at = ?1
                 WHERE instance_id = ?2 AND node_id = ?3 AND status = 'pending'",
                params![now_str(), instance_id, node_id],
            )?,
            None => conn.execute(
                "UPDATE workflow_approvals SET status = 'cancelled', resolved_at = ?1
                 WHERE instance_id = ?2 AND status = 'pending'",
                params![now_str(), instance_id],
            )?,
        };
        Ok(updated)
    }

    fn list_votes(&self, approval_id: &str) -> Result<Vec<ApprovalVote>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {VOTE_COLUMNS} FROM workflow_approval_votes
             WHERE approval_id = ?1 ORDER BY rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![approval_id], row_to_vote)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn insert_log_row(conn: &Connection, log: &ExecutionLog) -> Result<()> {
    conn.execute(
        "INSERT INTO workflow_execution_logs
             (id, instance_id, node_id, node_type, status, output, error, resume_at,
              started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            log.id,
            log.instance_id,
            log.node_id,
            log.node_type.as_str(),
            log.status.as_str(),
            serde_json::to_string(&log.output)?,
            log.error,
            log.resume_at.as_ref().map(fmt_dt),
            fmt_dt(&log.started_at),
            log.finished_at.as_ref().map(fmt_dt),
        ],
    )?;
    Ok(())
}

/// Fixed-width UTC timestamps so text comparison orders them correctly.
fn fmt_dt(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_str() -> String {
    fmt_dt(&Utc::now())
}

fn parse_dt(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn dt_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_dt(idx, &row.get::<_, String>(idx)?)
}

fn opt_dt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_dt(idx, &s))
        .transpose()
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn enum_col<T: std::str::FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn row_to_definition(row: &Row<'_>) -> rusqlite::Result<WorkflowDefinition> {
    Ok(WorkflowDefinition {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        trigger_type: row.get(4)?,
        is_active: row.get(5)?,
        created_at: dt_col(row, 6)?,
        updated_at: dt_col(row, 7)?,
    })
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<WorkflowVersion> {
    Ok(WorkflowVersion {
        id: row.get(0)?,
        definition_id: row.get(1)?,
        version_number: row.get(2)?,
        graph: json_col(row, 3)?,
        status: enum_col(row, 4)?,
        created_at: dt_col(row, 5)?,
        published_at: opt_dt(row, 6)?,
    })
}

fn row_to_instance(row: &Row<'_>) -> rusqlite::Result<WorkflowInstance> {
    Ok(WorkflowInstance {
        id: row.get(0)?,
        definition_id: row.get(1)?,
        version_id: row.get(2)?,
        status: enum_col(row, 3)?,
        context: json_col(row, 4)?,
        trigger_payload: json_col(row, 5)?,
        current_nodes: json_col(row, 6)?,
        error: row.get(7)?,
        lock_version: row.get(8)?,
        restarted_from: row.get(9)?,
        created_at: dt_col(row, 10)?,
        updated_at: dt_col(row, 11)?,
        completed_at: opt_dt(row, 12)?,
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<ExecutionLog> {
    Ok(ExecutionLog {
        id: row.get(0)?,
        instance_id: row.get(1)?,
        node_id: row.get(2)?,
        node_type: enum_col(row, 3)?,
        status: enum_col::<LogStatus>(row, 4)?,
        output: json_col(row, 5)?,
        error: row.get(6)?,
        resume_at: opt_dt(row, 7)?,
        started_at: dt_col(row, 8)?,
        finished_at: opt_dt(row, 9)?,
    })
}

fn row_to_approval(row: &Row<'_>) -> rusqlite::Result<WorkflowApproval> {
    Ok(WorkflowApproval {
        id: row.get(0)?,
        instance_id: row.get(1)?,
        node_id: row.get(2)?,
        execution_log_id: row.get(3)?,
        approver_type: row.get(4)?,
        approver_config: json_col(row, 5)?,
        required_count: row.get(6)?,
        approved_count: row.get(7)?,
        rejected_count: row.get(8)?,
        status: enum_col(row, 9)?,
        allow_parallel: row.get(10)?,
        deadline: opt_dt(row, 11)?,
        created_at: dt_col(row, 12)?,
        resolved_at: opt_dt(row, 13)?,
    })
}

fn row_to_vote(row: &Row<'_>) -> rusqlite::Result<ApprovalVote> {
    Ok(ApprovalVote {
        id: row.get(0)?,
        approval_id: row.get(1)?,
        voter_id: row.get(2)?,
        decision: enum_col(row, 3)?,
        notes: row.get(4)?,
        created_at: dt_col(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, NodeKind, NodeSpec};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn graph() -> WorkflowGraph {
        WorkflowGraph::new()
            .with_node("start", NodeSpec::new(NodeKind::Trigger).with_edge(Edge::new("done")))
            .with_node("done", NodeSpec::new(NodeKind::End))
    }

    fn definition(slug: &str) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: Uuid::new_v4().to_string(),
            slug: slug.to_string(),
            name: slug.to_string(),
            description: String::new(),
            trigger_type: "manual".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn instance(store: &WorkflowStore) -> WorkflowInstance {
        let def = definition(&format!("wf-{}", Uuid::new_v4()));
        store.insert_definition(&def).unwrap();
        let version = store.create_version(&def.id, &graph()).unwrap();
        let now = Utc::now();
        let instance = WorkflowInstance {
            id: Uuid::new_v4().to_string(),
            definition_id: def.id,
            version_id: version.id,
            status: InstanceStatus::Waiting,
            context: json!({"member_id": 1}).as_object().cloned().unwrap(),
            trigger_payload: json!({"member_id": 1}),
            current_nodes: BTreeSet::from(["gate".to_string()]),
            error: None,
            lock_version: 0,
            restarted_from: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        store.insert_instance(&instance).unwrap();
        instance
    }

    fn approval(store: &WorkflowStore, instance: &WorkflowInstance, deadline: Option<DateTime<Utc>>) -> WorkflowApproval {
        let now = Utc::now();
        let log = ExecutionLog {
            id: Uuid::new_v4().to_string(),
            instance_id: instance.id.clone(),
            node_id: "gate".into(),
            node_type: NodeKind::Approval,
            status: LogStatus::Waiting,
            output: Value::Null,
            error: None,
            resume_at: None,
            started_at: now,
            finished_at: None,
        };
        let approval = WorkflowApproval {
            id: Uuid::new_v4().to_string(),
            instance_id: instance.id.clone(),
            node_id: "gate".into(),
            execution_log_id: log.id.clone(),
            approver_type: "member".into(),
            approver_config: json!({"approvers": ["a", "b"]}),
            required_count: 1,
            approved_count: 0,
            rejected_count: 0,
            status: ApprovalStatus::Pending,
            allow_parallel: true,
            deadline,
            created_at: now,
            resolved_at: None,
        };
        store.open_approval(&log, &approval).unwrap();
        approval
    }

    fn vote(approval_id: &str, voter: &str, decision: VoteDecision) -> ApprovalVote {
        ApprovalVote {
            id: Uuid::new_v4().to_string(),
            approval_id: approval_id.to_string(),
            voter_id: voter.to_string(),
            decision,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = WorkflowStore::open_in_memory().unwrap();
        assert!(store.list_definitions().unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk_twice() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("workflows.db");
        {
            let store = WorkflowStore::open(&path).unwrap();
            store.insert_definition(&definition("persisted")).unwrap();
        }
        let store = WorkflowStore::open(&path).unwrap();
        assert!(store.find_definition_by_slug("persisted").unwrap().is_some());
    }

    #[test]
    fn test_open_with_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let section = DatabaseSection {
            path: Some(dir.path().join("nested").join("kmp.db")),
            busy_timeout_ms: 100,
        };
        WorkflowStore::open_with(&section).unwrap();
        assert!(dir.path().join("nested").join("kmp.db").exists());
    }

    #[test]
    fn test_duplicate_slug() {
        let store = WorkflowStore::open_in_memory().unwrap();
        store.insert_definition(&definition("award-rec")).unwrap();
        let err = store.insert_definition(&definition("award-rec")).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateSlug(s) if s == "award-rec"));
    }

    #[test]
    fn test_version_numbers_monotonic() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let def = definition("officer-hire");
        store.insert_definition(&def).unwrap();
        let v1 = store.create_version(&def.id, &graph()).unwrap();
        let v2 = store.create_version(&def.id, &graph()).unwrap();
        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);
        assert_eq!(v2.status, VersionStatus::Draft);
        assert_eq!(store.get_version(&v1.id).unwrap().unwrap().graph, graph());
    }

    #[test]
    fn test_create_version_unknown_definition() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let err = store.create_version("missing", &graph()).unwrap_err();
        assert!(matches!(err, WorkflowError::DefinitionNotFound(_)));
    }

    #[test]
    fn test_publish_archives_previous() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let def = definition("warrant");
        store.insert_definition(&def).unwrap();
        let v1 = store.create_version(&def.id, &graph()).unwrap();
        let v2 = store.create_version(&def.id, &graph()).unwrap();

        store.publish_version(&v1.id).unwrap();
        assert_eq!(store.published_version(&def.id).unwrap().unwrap().id, v1.id);

        let published = store.publish_version(&v2.id).unwrap();
        assert_eq!(published.status, VersionStatus::Published);
        assert!(published.published_at.is_some());
        assert_eq!(store.published_version(&def.id).unwrap().unwrap().id, v2.id);
        assert_eq!(
            store.get_version(&v1.id).unwrap().unwrap().status,
            VersionStatus::Archived
        );
    }

    #[test]
    fn test_publish_unknown_version() {
        let store = WorkflowStore::open_in_memory().unwrap();
        assert!(matches!(
            store.publish_version("nope").unwrap_err(),
            WorkflowError::VersionNotFound(_)
        ));
    }

    #[test]
    fn test_instance_round_trip() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        let loaded = store.get_instance(&inst.id).unwrap().unwrap();
        assert_eq!(loaded.context, inst.context);
        assert_eq!(loaded.current_nodes, inst.current_nodes);
        assert_eq!(loaded.status, InstanceStatus::Waiting);
        assert_eq!(
            store.list_instances(Some(InstanceStatus::Waiting)).unwrap().len(),
            1
        );
        assert!(store.list_instances(Some(InstanceStatus::Failed)).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        store
            .conn
            .lock()
            .execute(
                "UPDATE workflow_instances SET updated_at = 'yesterday' WHERE id = ?1",
                params![inst.id],
            )
            .unwrap();

        let err = store.get_instance(&inst.id).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Database(rusqlite::Error::FromSqlConversionFailure(11, _, _))
        ));
    }

    #[test]
    fn test_corrupt_optional_timestamp_is_an_error() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        let approval = approval(&store, &inst, None);
        store
            .conn
            .lock()
            .execute(
                "UPDATE workflow_approvals SET deadline = 'soon' WHERE id = ?1",
                params![approval.id],
            )
            .unwrap();

        assert!(store.get_approval(&approval.id).is_err());
    }

    #[test]
    fn test_save_instance_is_conditional() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let mut first = instance(&store);
        let mut second = first.clone();

        first.status = InstanceStatus::Running;
        assert!(store.save_instance(&mut first, InstanceStatus::Waiting).unwrap());
        assert_eq!(first.lock_version, 1);

        // Stale copy loses: status and lock_version both moved on.
        second.status = InstanceStatus::Running;
        assert!(!store.save_instance(&mut second, InstanceStatus::Waiting).unwrap());
        assert_eq!(second.lock_version, 0);

        first.status = InstanceStatus::Completed;
        assert!(store.save_instance(&mut first, InstanceStatus::Running).unwrap());
        let loaded = store.get_instance(&first.id).unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Completed);
        assert_eq!(loaded.lock_version, 2);
    }

    #[test]
    fn test_waiting_log_finishes_once() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        let approval = approval(&store, &inst, None);

        let log = store.waiting_log(&inst.id, "gate").unwrap().unwrap();
        assert_eq!(log.id, approval.execution_log_id);
        assert!(store.finish_waiting_log(&log.id, &json!({"port": "approved"})).unwrap());
        assert!(!store.finish_waiting_log(&log.id, &json!({})).unwrap());
        assert!(store.waiting_log(&inst.id, "gate").unwrap().is_none());

        let logs = store.list_logs(&inst.id).unwrap();
        assert_eq!(logs[0].status, LogStatus::Done);
        assert_eq!(logs[0].output["port"], "approved");
    }

    #[test]
    fn test_record_vote_counts_and_dedups() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        let approval = approval(&store, &inst, None);

        let updated = store
            .record_vote(&vote(&approval.id, "a", VoteDecision::Reject))
            .unwrap()
            .unwrap();
        assert_eq!(updated.rejected_count, 1);

        let err = store
            .record_vote(&vote(&approval.id, "a", VoteDecision::Approve))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateVote { .. }));

        let after = store.get_approval(&approval.id).unwrap().unwrap();
        assert_eq!(after.approved_count, 0);
        assert_eq!(after.rejected_count, 1);
        assert_eq!(store.list_votes(&approval.id).unwrap().len(), 1);
    }

    #[test]
    fn test_record_vote_after_resolution_is_none() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        let approval = approval(&store, &inst, None);

        assert!(store.resolve_approval(&approval.id, ApprovalStatus::Approved).unwrap());
        assert!(!store.resolve_approval(&approval.id, ApprovalStatus::Expired).unwrap());
        assert!(
            store
                .record_vote(&vote(&approval.id, "b", VoteDecision::Approve))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_expired_approvals_filter() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let past = instance(&store);
        let future = instance(&store);
        let expired = approval(&store, &past, Some(Utc::now() - chrono::Duration::hours(1)));
        approval(&store, &future, Some(Utc::now() + chrono::Duration::hours(1)));

        let due = store.expired_approvals(Utc::now(), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, expired.id);

        store.resolve_approval(&expired.id, ApprovalStatus::Expired).unwrap();
        assert!(store.expired_approvals(Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_cancel_pending_approvals() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        let approval = approval(&store, &inst, None);
        assert_eq!(store.cancel_pending_approvals(&inst.id, None).unwrap(), 1);
        assert_eq!(
            store.get_approval(&approval.id).unwrap().unwrap().status,
            ApprovalStatus::Cancelled
        );
        assert_eq!(store.cancel_pending_approvals(&inst.id, None).unwrap(), 0);
    }

    #[test]
    fn test_due_waits() {
        let store = WorkflowStore::open_in_memory().unwrap();
        let inst = instance(&store);
        let now = Utc::now();
        let log = ExecutionLog {
            id: Uuid::new_v4().to_string(),
            instance_id: inst.id.clone(),
            node_id: "pause".into(),
            node_type: NodeKind::Wait,
            status: LogStatus::Waiting,
            output: Value::Null,
            error: None,
            resume_at: Some(now - chrono::Duration::seconds(5)),
            started_at: now,
            finished_at: None,
        };
        store.insert_log(&log).unwrap();
        assert_eq!(store.due_waits(now, 10).unwrap().len(), 1);
        assert!(
            store
                .due_waits(now - chrono::Duration::minutes(1), 10)
                .unwrap()
                .is_empty()
        );
    }
}
