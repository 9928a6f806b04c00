use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::traits::{Transaction, TransactionManager};
use stepgraph_core::types::{Revision, Workflow};

/// Shared, ordered record of transaction calls, e.g. `"commit tx-1"`.
#[derive(Clone, Default)]
pub struct TransactionEvents(Arc<Mutex<Vec<String>>>);

impl TransactionEvents {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A transaction that only records what was done to it.
pub struct RecordingTransaction {
    id: String,
    events: TransactionEvents,
    fail_commit: bool,
}

impl RecordingTransaction {
    pub fn new(id: impl Into<String>, events: TransactionEvents) -> Self {
        Self {
            id: id.into(),
            events,
            fail_commit: false,
        }
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }
}

impl Transaction for RecordingTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.events.push(format!("commit {}", self.id));
            if self.fail_commit {
                return Err(StepGraphError::Transaction("commit refused".to_string()));
            }
            Ok(())
        })
    }

    fn rollback(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.events.push(format!("rollback {}", self.id));
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.events.push(format!("close {}", self.id));
            Ok(())
        })
    }
}

/// Opens [`RecordingTransaction`]s named `tx-1`, `tx-2`, ...
#[derive(Default)]
pub struct RecordingTransactionManager {
    events: TransactionEvents,
    opened: AtomicUsize,
    fail_commit: bool,
}

impl RecordingTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transaction opened by this manager refuses to commit.
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn events(&self) -> TransactionEvents {
        self.events.clone()
    }
}

impl TransactionManager for RecordingTransactionManager {
    fn open<'a>(
        &'a self,
        _workflow: &'a Workflow,
        _revision: &'a Revision,
    ) -> BoxFuture<'a, Result<Arc<dyn Transaction>>> {
        Box::pin(async move {
            let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("tx-{}", n);
            self.events.push(format!("open {}", id));
            let mut tx = RecordingTransaction::new(id, self.events.clone());
            if self.fail_commit {
                tx = tx.failing_commit();
            }
            Ok(Arc::new(tx) as Arc<dyn Transaction>)
        })
    }
}
