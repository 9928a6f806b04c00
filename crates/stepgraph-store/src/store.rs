use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::registry::Registry;
use stepgraph_core::traits::{RunLogSink, WorkflowStore};
use stepgraph_core::types::*;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        workflow_type_name TEXT NOT NULL,
        current_revision_id INTEGER,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS workflow_revisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id INTEGER NOT NULL REFERENCES workflows(id),
        version_no INTEGER NOT NULL,
        start_step_no INTEGER,
        api_name TEXT,
        api_version TEXT,
        commit_message TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (workflow_id, version_no)
    );

    CREATE TABLE IF NOT EXISTS workflow_steps (
        revision_id INTEGER NOT NULL REFERENCES workflow_revisions(id),
        step_no INTEGER NOT NULL,
        position INTEGER NOT NULL,
        step_type_name TEXT NOT NULL,
        input_json TEXT NOT NULL DEFAULT '',
        summary TEXT,
        PRIMARY KEY (revision_id, step_no)
    );

    CREATE TABLE IF NOT EXISTS workflow_links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        revision_id INTEGER NOT NULL REFERENCES workflow_revisions(id),
        from_step_no INTEGER NOT NULL,
        to_step_no INTEGER,
        condition_value TEXT
    );

    -- NULL (unconditional) must collide with NULL, so index a non-null key.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_links_condition
        ON workflow_links(revision_id, from_step_no, coalesce(condition_value, x'00'));

    CREATE TABLE IF NOT EXISTS workflow_run_logs (
        run_id TEXT PRIMARY KEY,
        workflow_id INTEGER NOT NULL,
        revision_id INTEGER,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        had_error INTEGER NOT NULL DEFAULT 0,
        error_message TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_run_logs_workflow
        ON workflow_run_logs(workflow_id, started_at);

    CREATE TABLE IF NOT EXISTS workflow_run_log_steps (
        run_id TEXT NOT NULL REFERENCES workflow_run_logs(run_id),
        seq_no INTEGER NOT NULL,
        step_no INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT NOT NULL,
        output_data TEXT,
        message TEXT,
        PRIMARY KEY (run_id, seq_no)
    );
";

/// Content of a revision about to be stored. Id, version number and
/// creation time are assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRevision {
    pub start_step_no: Option<StepNo>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub api_name: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
}

impl From<Revision> for NewRevision {
    fn from(r: Revision) -> Self {
        Self {
            start_step_no: r.start_step_no,
            steps: r.steps,
            links: r.links,
            api_name: r.api_name,
            api_version: r.api_version,
            commit_message: r.commit_message,
        }
    }
}

/// One row of `stepgraph runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub workflow_id: WorkflowId,
    pub revision_id: Option<RevisionId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub had_error: bool,
    pub error_message: Option<String>,
    pub step_count: usize,
}

/// SQLite-backed workflow store and run-log sink.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    registry: Option<Arc<Registry>>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StepGraphError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        let store = Self::with_schema(conn)?;
        debug!(path = %path.display(), "SQLite store opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_schema(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            registry: None,
        })
    }

    /// Validate revisions and generate step summaries against this
    /// registry when they are stored.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StepGraphError::Database(e.to_string()))
    }

    /// Shared handle for transactions opened on this store.
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

// ── Workflows and revisions ─────────────────────────────────────

impl SqliteStore {
    /// Create a workflow with no revision yet.
    pub fn create_workflow(&self, name: &str, workflow_type_name: &str) -> Result<Workflow> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflows (name, workflow_type_name, created_at) VALUES (?1, ?2, ?3)",
            params![name, workflow_type_name, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        info!(workflow_id = id, name, "Workflow created");
        Ok(Workflow {
            id,
            name: name.to_string(),
            workflow_type_name: workflow_type_name.to_string(),
            current_revision_id: None,
        })
    }

    /// Store an immutable revision and make it the workflow's current one.
    ///
    /// Version numbers count up from 1 per workflow. Two links leaving the
    /// same step with the same condition are rejected. With a registry
    /// attached, each step gets its type's generated summary and the
    /// revision must pass `Registry::validate_revision` for the workflow's
    /// type, or nothing is written.
    pub fn store_revision(
        &self,
        workflow_id: WorkflowId,
        mut revision: NewRevision,
    ) -> Result<Revision> {
        let mut conn = self.lock()?;
        let sp = conn.savepoint().map_err(db_err)?;

        let workflow_type_name: String = sp
            .query_row(
                "SELECT workflow_type_name FROM workflows WHERE id = ?1",
                params![workflow_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or(StepGraphError::WorkflowNotFound(workflow_id))?;

        if let Some(registry) = &self.registry {
            prepare_revision(registry, workflow_id, &workflow_type_name, &mut revision)?;
        }

        let version_no: u32 = sp
            .query_row(
                "SELECT COALESCE(MAX(version_no), 0) + 1 FROM workflow_revisions WHERE workflow_id = ?1",
                params![workflow_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let created_at = Utc::now();
        sp.execute(
            "INSERT INTO workflow_revisions
                (workflow_id, version_no, start_step_no, api_name, api_version, commit_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                workflow_id,
                version_no,
                revision.start_step_no,
                revision.api_name,
                revision.api_version,
                revision.commit_message,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        let revision_id = sp.last_insert_rowid();

        for (position, step) in revision.steps.iter().enumerate() {
            sp.execute(
                "INSERT INTO workflow_steps
                    (revision_id, step_no, position, step_type_name, input_json, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    revision_id,
                    step.step_no,
                    position as i64,
                    step.step_type_name,
                    step.input_json,
                    step.summary
                ],
            )
            .map_err(db_err)?;
        }

        for link in &revision.links {
            sp.execute(
                "INSERT INTO workflow_links (revision_id, from_step_no, to_step_no, condition_value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    revision_id,
                    link.from_step_no,
                    link.to_step_no,
                    link.condition_value
                ],
            )
            .map_err(db_err)?;
        }

        sp.execute(
            "UPDATE workflows SET current_revision_id = ?1 WHERE id = ?2",
            params![revision_id, workflow_id],
        )
        .map_err(db_err)?;
        sp.commit().map_err(db_err)?;

        info!(workflow_id, revision_id, version_no, "Workflow revision stored");
        Ok(Revision {
            id: revision_id,
            workflow_id,
            version_no,
            start_step_no: revision.start_step_no,
            steps: revision.steps,
            links: revision.links,
            api_name: revision.api_name,
            api_version: revision.api_version,
            commit_message: revision.commit_message,
            created_at: Some(created_at),
        })
    }

    pub fn find_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, workflow_type_name, current_revision_id FROM workflows WHERE id = ?1",
            params![id],
            |row| {
                Ok(Workflow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    workflow_type_name: row.get(2)?,
                    current_revision_id: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(db_err)?
        .ok_or(StepGraphError::WorkflowNotFound(id))
    }

    pub fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, workflow_type_name, current_revision_id FROM workflows ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Workflow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    workflow_type_name: row.get(2)?,
                    current_revision_id: row.get(3)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Load a revision with its steps and links in the order they were
    /// stored.
    pub fn load_revision(&self, id: RevisionId) -> Result<Revision> {
        let conn = self.lock()?;

        let mut revision = conn
            .query_row(
                "SELECT workflow_id, version_no, start_step_no, api_name, api_version, commit_message, created_at
                 FROM workflow_revisions WHERE id = ?1",
                params![id],
                |row| {
                    let created_at: String = row.get(6)?;
                    Ok(Revision {
                        id,
                        workflow_id: row.get(0)?,
                        version_no: row.get(1)?,
                        start_step_no: row.get(2)?,
                        steps: vec![],
                        links: vec![],
                        api_name: row.get(3)?,
                        api_version: row.get(4)?,
                        commit_message: row.get(5)?,
                        created_at: parse_timestamp(&created_at),
                    })
                },
            )
            .optional()
            .map_err(db_err)?
            .ok_or(StepGraphError::RevisionNotFound(id))?;

        let mut stmt = conn
            .prepare(
                "SELECT step_no, step_type_name, input_json, summary FROM workflow_steps
                 WHERE revision_id = ?1 ORDER BY position",
            )
            .map_err(db_err)?;
        revision.steps = stmt
            .query_map(params![id], |row| {
                Ok(Step {
                    step_no: row.get(0)?,
                    step_type_name: row.get(1)?,
                    input_json: row.get(2)?,
                    summary: row.get(3)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT from_step_no, to_step_no, condition_value FROM workflow_links
                 WHERE revision_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        revision.links = stmt
            .query_map(params![id], |row| {
                Ok(Link {
                    from_step_no: row.get(0)?,
                    to_step_no: row.get(1)?,
                    condition_value: row.get(2)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        Ok(revision)
    }
}

// ── Run logs ────────────────────────────────────────────────────

impl SqliteStore {
    /// Write a run log and its entries, replacing any earlier copy.
    pub fn save_run(&self, run_log: &RunLog) -> Result<()> {
        let mut conn = self.lock()?;
        let sp = conn.savepoint().map_err(db_err)?;

        sp.execute(
            "INSERT OR REPLACE INTO workflow_run_logs
                (run_id, workflow_id, revision_id, started_at, ended_at, had_error, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_log.run_id,
                run_log.workflow_id,
                run_log.revision_id,
                run_log.started_at.to_rfc3339(),
                run_log.ended_at.map(|t| t.to_rfc3339()),
                run_log.had_error,
                run_log.error_message,
            ],
        )
        .map_err(db_err)?;

        sp.execute(
            "DELETE FROM workflow_run_log_steps WHERE run_id = ?1",
            params![run_log.run_id],
        )
        .map_err(db_err)?;

        for entry in &run_log.steps {
            sp.execute(
                "INSERT INTO workflow_run_log_steps
                    (run_id, seq_no, step_no, started_at, ended_at, output_data, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run_log.run_id,
                    entry.seq_no,
                    entry.step_no,
                    entry.started_at.to_rfc3339(),
                    entry.ended_at.to_rfc3339(),
                    entry.output_data,
                    entry.message,
                ],
            )
            .map_err(db_err)?;
        }

        sp.commit().map_err(db_err)?;
        debug!(run_id = %run_log.run_id, steps = run_log.steps.len(), "Run log saved");
        Ok(())
    }

    /// Most recent runs of a workflow, newest first.
    pub fn list_runs(&self, workflow_id: WorkflowId, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.run_id, r.workflow_id, r.revision_id, r.started_at, r.ended_at,
                        r.had_error, r.error_message,
                        (SELECT COUNT(*) FROM workflow_run_log_steps s WHERE s.run_id = r.run_id)
                 FROM workflow_run_logs r
                 WHERE r.workflow_id = ?1
                 ORDER BY r.started_at DESC, r.rowid DESC
                 LIMIT ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![workflow_id, limit as i64], |row| {
                let started_at: String = row.get(3)?;
                let ended_at: Option<String> = row.get(4)?;
                let step_count: i64 = row.get(7)?;
                Ok(RunSummary {
                    run_id: row.get(0)?,
                    workflow_id: row.get(1)?,
                    revision_id: row.get(2)?,
                    started_at: parse_timestamp(&started_at).unwrap_or_else(Utc::now),
                    ended_at: ended_at.as_deref().and_then(parse_timestamp),
                    had_error: row.get(5)?,
                    error_message: row.get(6)?,
                    step_count: step_count as usize,
                })
            })
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Entries of one run in sequence order.
    pub fn load_run_steps(&self, run_id: &str) -> Result<Vec<RunLogStep>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT seq_no, step_no, started_at, ended_at, output_data, message
                 FROM workflow_run_log_steps
                 WHERE run_id = ?1
                 ORDER BY seq_no",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![run_id], |row| {
                let started_at: String = row.get(2)?;
                let ended_at: String = row.get(3)?;
                Ok(RunLogStep {
                    seq_no: row.get(0)?,
                    step_no: row.get(1)?,
                    started_at: parse_timestamp(&started_at).unwrap_or_else(Utc::now),
                    ended_at: parse_timestamp(&ended_at).unwrap_or_else(Utc::now),
                    output_data: row.get(4)?,
                    message: row.get(5)?,
                })
            })
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

impl WorkflowStore for SqliteStore {
    fn get_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<Workflow>> {
        Box::pin(async move { self.find_workflow(id) })
    }

    fn get_revision(&self, id: RevisionId) -> BoxFuture<'_, Result<Revision>> {
        Box::pin(async move { self.load_revision(id) })
    }
}

impl RunLogSink for SqliteStore {
    fn record_run<'a>(&'a self, run_log: &'a RunLog) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.save_run(run_log) })
    }
}

/// Fill generated summaries and reject the revision if it does not validate.
fn prepare_revision(
    registry: &Registry,
    workflow_id: WorkflowId,
    workflow_type_name: &str,
    revision: &mut NewRevision,
) -> Result<()> {
    for step in &mut revision.steps {
        if let Some(summary) = registry.dynamic_summary(step) {
            step.summary = Some(summary);
        }
    }

    let mut draft = Revision::draft(workflow_id, 0)
        .with_steps(revision.steps.clone())
        .with_links(revision.links.clone());
    draft.start_step_no = revision.start_step_no;

    let errors = registry.validate_revision(workflow_type_name, &draft);
    if errors.is_empty() {
        Ok(())
    } else {
        warn!(workflow_id, count = errors.len(), "Revision failed validation");
        Err(StepGraphError::Validation(errors))
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> StepGraphError {
    StepGraphError::Database(e.to_string())
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
