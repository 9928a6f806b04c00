//! Execution engine for stepgraph workflows.
//!
//! [`WorkflowExecutor`] runs a stored revision step by step, following
//! links according to each step type's link mode, running fork branches
//! and walking containers. The [`graph`] module holds the traversal
//! primitives it is built on, which [`tree`] also uses to render a
//! revision as a nested structure.

pub mod builtin;
pub mod executor;
pub mod graph;

pub use builtin::{builtin_registry, register_builtins, DEFAULT_WORKFLOW_TYPE};
pub use executor::{RunInput, RunOutput, WorkflowExecutor};
pub use graph::{join, resolver, tree, GraphModel};
