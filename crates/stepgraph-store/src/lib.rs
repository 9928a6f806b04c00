//! SQLite persistence for stepgraph.
//!
//! [`SqliteStore`] keeps workflows, their immutable revisions, and the run
//! logs of every run. It implements the engine's `WorkflowStore`,
//! `RunLogSink` and `TransactionManager` seams.

pub mod store;
pub mod transaction;

pub use store::{NewRevision, RunSummary, SqliteStore};
pub use transaction::SqliteTransaction;
