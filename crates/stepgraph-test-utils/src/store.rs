use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;

use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::traits::{RunLogSink, WorkflowStore};
use stepgraph_core::types::*;

#[derive(Default)]
struct Tables {
    workflows: HashMap<WorkflowId, Workflow>,
    revisions: HashMap<RevisionId, Revision>,
    runs: Vec<RunLog>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory workflow store that also captures run logs.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a workflow whose current revision is `revision`.
    pub fn insert_workflow(
        &self,
        name: &str,
        workflow_type_name: &str,
        revision: Revision,
    ) -> WorkflowId {
        let mut tables = self.tables.lock().unwrap();
        let workflow_id = tables.next_id();
        tables.workflows.insert(
            workflow_id,
            Workflow {
                id: workflow_id,
                name: name.to_string(),
                workflow_type_name: workflow_type_name.to_string(),
                current_revision_id: None,
            },
        );
        drop(tables);
        self.add_revision(workflow_id, revision);
        workflow_id
    }

    /// Store a new revision and make it current.
    pub fn add_revision(&self, workflow_id: WorkflowId, mut revision: Revision) -> RevisionId {
        let mut tables = self.tables.lock().unwrap();
        let revision_id = tables.next_id();
        let version_no = tables
            .revisions
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .count() as u32
            + 1;

        revision.id = revision_id;
        revision.workflow_id = workflow_id;
        revision.version_no = version_no;
        revision.created_at = Some(Utc::now());
        tables.revisions.insert(revision_id, revision);

        if let Some(workflow) = tables.workflows.get_mut(&workflow_id) {
            workflow.current_revision_id = Some(revision_id);
        }
        revision_id
    }

    pub fn workflow(&self, id: WorkflowId) -> Option<Workflow> {
        self.tables.lock().unwrap().workflows.get(&id).cloned()
    }

    /// Every run log handed to this store, oldest first.
    pub fn runs(&self) -> Vec<RunLog> {
        self.tables.lock().unwrap().runs.clone()
    }

    pub fn last_run(&self) -> Option<RunLog> {
        self.tables.lock().unwrap().runs.last().cloned()
    }
}

impl WorkflowStore for MemoryStore {
    fn get_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<Workflow>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .workflows
                .get(&id)
                .cloned()
                .ok_or(StepGraphError::WorkflowNotFound(id))
        })
    }

    fn get_revision(&self, id: RevisionId) -> BoxFuture<'_, Result<Revision>> {
        Box::pin(async move {
            self.tables
                .lock()
                .unwrap()
                .revisions
                .get(&id)
                .cloned()
                .ok_or(StepGraphError::RevisionNotFound(id))
        })
    }
}

impl RunLogSink for MemoryStore {
    fn record_run<'a>(&'a self, run_log: &'a RunLog) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.tables.lock().unwrap().runs.push(run_log.clone());
            Ok(())
        })
    }
}

/// A run-log sink that always fails.
pub struct FailingSink;

impl RunLogSink for FailingSink {
    fn record_run<'a>(&'a self, _run_log: &'a RunLog) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(StepGraphError::Database("sink unavailable".to_string())) })
    }
}
