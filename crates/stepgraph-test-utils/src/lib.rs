//! Shared test support for stepgraph crates: an in-memory store, a
//! recording transaction manager, and a registry of test step types.

pub mod fixtures;
pub mod store;
pub mod transaction;

use std::path::PathBuf;

pub use fixtures::{test_registry, TestWorkflowType};
pub use store::{FailingSink, MemoryStore};
pub use transaction::{RecordingTransaction, RecordingTransactionManager, TransactionEvents};

/// Write `contents` to a `stepgraph.toml` inside a fresh temp dir.
///
/// Keep the returned `TempDir` alive for as long as the file is needed.
pub fn temp_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("stepgraph.toml");
    std::fs::write(&path, contents).expect("write config");
    (dir, path)
}
