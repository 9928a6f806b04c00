use std::sync::Arc;

use serde_json::Value;

use crate::traits::Transaction;
use crate::types::{Revision, Values, Workflow};

/// Run-scoped mutable state threaded through the step loop.
///
/// Step behaviors and workflow-type hooks read and write `values`. A caller
/// may hand the same context to several sequential runs (test harnesses do
/// this); each run merges its input values on top.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    values: Values,
    workflow: Option<Workflow>,
    revision: Option<Revision>,
    transaction: Option<Arc<dyn Transaction>>,
    is_test_run: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from initial values.
    pub fn from_values(values: Values) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    /// Mark this context as belonging to a test run.
    pub fn with_test_run(mut self, is_test_run: bool) -> Self {
        self.is_test_run = is_test_run;
        self
    }

    pub fn is_test_run(&self) -> bool {
        self.is_test_run
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Merge values into this context (overwrites on conflict).
    pub fn merge(&mut self, values: Values) {
        for (k, v) in values {
            self.values.insert(k, v);
        }
    }

    pub fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_ref()
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }

    pub fn set_workflow(&mut self, workflow: Workflow, revision: Revision) {
        self.workflow = Some(workflow);
        self.revision = Some(revision);
    }

    /// The unit of work the run participates in, if any.
    pub fn transaction(&self) -> Option<&Arc<dyn Transaction>> {
        self.transaction.as_ref()
    }

    pub fn set_transaction(&mut self, transaction: Option<Arc<dyn Transaction>>) {
        self.transaction = transaction;
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("values", &self.values)
            .field("workflow", &self.workflow.as_ref().map(|w| w.id))
            .field("revision", &self.revision.as_ref().map(|r| r.id))
            .field("transaction", &self.transaction.as_ref().map(|t| t.id().to_string()))
            .field("is_test_run", &self.is_test_run)
            .finish()
    }
}
