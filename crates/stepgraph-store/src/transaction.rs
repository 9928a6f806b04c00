use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::traits::{Transaction, TransactionManager};
use stepgraph_core::types::{Revision, Workflow};

use crate::store::{db_err, SqliteStore};

/// A `BEGIN`/`COMMIT` block on the store's shared connection.
///
/// Everything written through the store while the transaction is open is
/// part of it, so only one can be open per store at a time.
pub struct SqliteTransaction {
    id: String,
    conn: Arc<Mutex<Connection>>,
    finished: AtomicBool,
}

impl SqliteTransaction {
    fn begin(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        conn.lock()
            .map_err(|e| StepGraphError::Database(e.to_string()))?
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StepGraphError::Transaction(e.to_string()))?;

        Ok(Self {
            id: format!("sqlite-{}", Uuid::new_v4()),
            conn,
            finished: AtomicBool::new(false),
        })
    }

    fn finish(&self, sql: &str) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(StepGraphError::Transaction(format!(
                "transaction {} already finished",
                self.id
            )));
        }
        self.conn
            .lock()
            .map_err(|e| StepGraphError::Database(e.to_string()))?
            .execute_batch(sql)
            .map_err(|e| StepGraphError::Transaction(e.to_string()))?;
        self.finished.store(true, Ordering::SeqCst);
        debug!(transaction = %self.id, sql, "Transaction finished");
        Ok(())
    }
}

impl Transaction for SqliteTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.finish("COMMIT") })
    }

    fn rollback(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.finish("ROLLBACK") })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.finished.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.finish("ROLLBACK")
        })
    }
}

impl TransactionManager for SqliteStore {
    fn open<'a>(
        &'a self,
        workflow: &'a Workflow,
        _revision: &'a Revision,
    ) -> BoxFuture<'a, Result<Arc<dyn Transaction>>> {
        Box::pin(async move {
            let tx = SqliteTransaction::begin(self.connection())?;
            debug!(transaction = %tx.id, workflow_id = workflow.id, "Transaction opened");
            Ok(Arc::new(tx) as Arc<dyn Transaction>)
        })
    }
}
